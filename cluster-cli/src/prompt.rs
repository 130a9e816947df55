//! Terminal prompts backed by dialoguer

use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use epoch_cluster_core::{ClusterError, Result, SelectionChoice, ServerSelector};
use tracing::debug;

/// Arrow-key server picker. Disabled servers are not offered.
#[derive(Debug, Default)]
pub struct DialoguerSelector;

fn pick(prompt: String, items: Vec<String>) -> Result<String> {
    let idx = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(|e| ClusterError::Prompt(e.to_string()))?
        .ok_or_else(|| ClusterError::Prompt("selection cancelled".to_string()))?;
    Ok(items[idx].clone())
}

/// Run a blocking dialoguer prompt off the async runtime
async fn pick_blocking(prompt: String, items: Vec<String>) -> Result<String> {
    tokio::task::spawn_blocking(move || pick(prompt, items))
        .await
        .map_err(|e| ClusterError::Prompt(e.to_string()))?
}

impl ServerSelector for DialoguerSelector {
    async fn select(&self, choices: &[SelectionChoice]) -> Result<String> {
        for choice in choices {
            if let Some(reason) = choice.disabled {
                debug!("{} hidden from the picker: {}", choice.name, reason);
            }
        }

        let names: Vec<String> = choices
            .iter()
            .filter(|c| c.disabled.is_none())
            .map(|c| c.name.clone())
            .collect();
        if names.is_empty() {
            return Err(ClusterError::Prompt("no server can be selected".to_string()));
        }
        pick_blocking("Select a server".to_string(), names).await
    }
}

/// Ask for one of the configured model types
pub async fn model_type(types: &[String]) -> Result<String> {
    if types.is_empty() {
        return Err(ClusterError::Prompt("no trainable model types are configured".to_string()));
    }
    pick_blocking("Select a model type".to_string(), types.to_vec()).await
}
