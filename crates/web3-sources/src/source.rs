//! Data Sources as Tools
//!
//! A [`DataSource`] exposes a fixed set of operations. Each operation
//! becomes one [`SourceTool`] in the research registry.

use std::sync::Arc;

use async_trait::async_trait;
use research_core::Tool;

use crate::error::Result;

/// One operation a data source offers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operation {
    /// Tool id seen by the model
    pub id: &'static str,
    pub description: &'static str,
}

/// Data source trait (Strategy pattern)
///
/// Implement this for each provider: DeFiLlama, Etherscan, CoinMarketCap.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Provider display name
    fn name(&self) -> &'static str;

    fn operations(&self) -> &'static [Operation];

    /// Run `operation` with the raw model-supplied argument
    async fn run(&self, operation: &str, input: &str) -> Result<String>;
}

/// Adapter from one data-source operation to the research `Tool` contract
///
/// Errors become observation text so the model can react to them.
pub struct SourceTool {
    source: Arc<dyn DataSource>,
    operation: Operation,
}

impl SourceTool {
    pub fn new(source: Arc<dyn DataSource>, operation: Operation) -> Self {
        Self { source, operation }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }
}

#[async_trait]
impl Tool for SourceTool {
    fn name(&self) -> &str {
        self.operation.id
    }

    fn description(&self) -> &str {
        self.operation.description
    }

    async fn invoke(&self, argument: &str) -> String {
        match self.source.run(self.operation.id, argument).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    source = self.source.name(),
                    tool = self.operation.id,
                    error = %e,
                    "Data source call failed"
                );
                format!("Error: {e}")
            }
        }
    }
}

/// One tool per operation of `source`
pub fn tools_for(source: Arc<dyn DataSource>) -> Vec<Arc<dyn Tool>> {
    source
        .operations()
        .iter()
        .map(|op| Arc::new(SourceTool::new(Arc::clone(&source), *op)) as Arc<dyn Tool>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    struct Flaky;

    const OPS: &[Operation] = &[
        Operation {
            id: "flaky_ok",
            description: "Always works",
        },
        Operation {
            id: "flaky_err",
            description: "Always fails",
        },
    ];

    #[async_trait]
    impl DataSource for Flaky {
        fn name(&self) -> &'static str {
            "Flaky"
        }

        fn operations(&self) -> &'static [Operation] {
            OPS
        }

        async fn run(&self, operation: &str, input: &str) -> Result<String> {
            match operation {
                "flaky_ok" => Ok(format!("echo {input}")),
                _ => Err(SourceError::MissingApiKey("Flaky")),
            }
        }
    }

    #[tokio::test]
    async fn test_errors_become_text() {
        let tools = tools_for(Arc::new(Flaky));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name(), "flaky_ok");
        assert_eq!(tools[0].invoke("hi").await, "echo hi");
        assert_eq!(tools[1].invoke("").await, "Error: Flaky API key not configured");
    }
}
