//! Scenario bookkeeping.

use asynccall::{CallError, Channel, LoopbackTransport};

use crate::service;

pub const NUM_STREAM_RESPONSES: usize = 5;
pub const RESPONSE_PAYLOAD_SIZE: i32 = 42;
pub const REQUEST_PAYLOAD_SIZE: i32 = 7;
/// Gap between streamed responses; long enough to cancel mid-stream.
pub const RESPONSE_INTERVAL_US: i32 = 100_000;
pub const CANCELLED_DETAILS: &str = "Locally cancelled by application!";
pub const SHORT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(100);

/// Channels shared by every scenario.
pub struct Fixture {
    /// Serves `TestService`.
    pub channel: Channel,
    /// Points at a peer that never answers.
    pub unreachable: Channel,
}

impl Fixture {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            channel: Channel::builder(service::transport()).use_proto().build()?,
            unreachable: Channel::builder(LoopbackTransport::unreachable()).build()?,
        })
    }
}

pub struct CaseResult {
    pub name: &'static str,
    pub error: Option<String>,
}

impl CaseResult {
    pub fn new(name: &'static str, result: anyhow::Result<()>) -> Self {
        Self {
            name,
            error: result.err().map(|e| format!("{e:#}")),
        }
    }
}

/// Print a suite's results and return how many cases failed.
pub fn report(title: &str, results: &[CaseResult]) -> usize {
    println!("=== {title} ===");
    let mut failed = 0;
    for result in results {
        match &result.error {
            None => println!("  PASS  {}", result.name),
            Some(e) => {
                println!("  FAIL  {}: {e}", result.name);
                failed += 1;
            }
        }
    }
    println!("  {}/{} passed", results.len() - failed, results.len());
    failed
}

/// The error of a call that was expected to fail.
pub fn expect_err<T>(result: Result<T, CallError>) -> anyhow::Result<CallError> {
    match result {
        Ok(_) => anyhow::bail!("expected the call to fail"),
        Err(e) => Ok(e),
    }
}
