use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use verity_core::{CallOptions, VerifiedResult, VerityClient};

use super::utils::{parse_params, print_call_error};

/// Overrides shared by `call` and batch entries.
#[derive(Debug, Clone, Default, Deserialize, clap::Args)]
pub struct CallArgs {
    /// Required confirmations
    #[arg(long)]
    #[serde(default)]
    pub finality: Option<u64>,

    /// Replacement rounds after the first one
    #[arg(long)]
    #[serde(default)]
    pub retries: Option<u32>,

    /// Overall call budget in milliseconds
    #[arg(long)]
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CallArgs {
    pub fn options(&self) -> CallOptions {
        CallOptions {
            finality: self.finality,
            max_retries: self.retries,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// One entry of a batch file.
#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub chain: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(flatten)]
    pub args: CallArgs,
}

fn render(result: &VerifiedResult) -> Value {
    json!({
        "result": result.value(),
        "provenance": {
            "chainId": result.chain_id(),
            "block": result.proving_block_number(),
            "blockHash": result.proving_block_hash(),
            "node": result.node().as_str(),
            "verifiedAt": result.verified_at(),
        }
    })
}

pub async fn run_call(
    client: &VerityClient,
    chain: &str,
    method: &str,
    params: Option<&str>,
    args: &CallArgs,
) -> Result<()> {
    let params = parse_params(params)?;
    match client.call(chain, method, params, &args.options()).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&render(&result))?);
            Ok(())
        }
        Err(err) => {
            print_call_error(&err);
            bail!("call failed: {}", err.kind.as_str())
        }
    }
}

/// Reads a JSON array of [`BatchEntry`].
pub fn read_batch(file: &str) -> Result<Vec<BatchEntry>> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
    serde_json::from_str(&raw).with_context(|| format!("{file} is not a JSON array of calls"))
}

pub async fn run_batch(client: &VerityClient, file: &str) -> Result<()> {
    let entries = read_batch(file)?;
    let calls = entries
        .into_iter()
        .map(|entry| client.batch_call(&entry.chain, entry.method, entry.params, entry.args.options()))
        .collect::<Result<Vec<_>, _>>()?;

    let results = client.call_batch(calls).await;
    let mut failed = 0;
    let rendered: Vec<Value> = results
        .iter()
        .map(|outcome| match outcome {
            Ok(result) => render(result),
            Err(err) => {
                failed += 1;
                json!({ "error": err.to_string(), "kind": err.kind.as_str(), "attempts": err.trail.len() })
            }
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);

    if failed > 0 {
        bail!("{failed} of {} calls failed", rendered.len());
    }
    Ok(())
}
