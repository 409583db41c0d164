//! HTTP task runner for fuzzing campaigns

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::fuzzer::{FuzzResult, ResultCollector, TaskRunner};

use super::client::HttpClient;
use super::request::Request;

/// Sends fuzzed HTTP requests and records the outcomes.
///
/// Successful sends are recorded directly; failures propagate to the engine,
/// which accounts them against the campaign's error budget and routes them
/// back to the collector through its error listener.
pub struct HttpTaskRunner {
    client: HttpClient,
    collector: Arc<ResultCollector>,
}

impl HttpTaskRunner {
    pub fn new(client: HttpClient, collector: Arc<ResultCollector>) -> Self {
        Self { client, collector }
    }

    /// Capture the unfuzzed template response as the comparison baseline
    pub fn capture_baseline(&self, template: &Request) -> Result<()> {
        let response = self
            .client
            .execute(template)
            .context("Baseline request failed")?;
        self.collector.set_baseline(response.status, response.size);
        tracing::debug!(
            status = response.status,
            length = response.size,
            "Captured baseline response"
        );
        Ok(())
    }
}

impl TaskRunner<Request> for HttpTaskRunner {
    fn run_task(&self, task_id: u64, message: Request, payloads: &[String]) -> Result<()> {
        let response = self.client.execute(&message)?;

        tracing::debug!(
            task = task_id,
            status = response.status,
            length = response.size,
            "Fuzzed request completed"
        );

        let result = FuzzResult::new(task_id, payloads.to_vec()).with_response(
            response.status,
            response.size,
            response.duration_ms,
            &response.body_text(),
        );
        self.collector.record(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;

    #[test]
    fn test_unreachable_target_is_an_error() {
        let client = HttpClient::new(&HttpConfig::default(), 0).unwrap();
        let collector = Arc::new(ResultCollector::new("test"));
        let runner = HttpTaskRunner::new(client, Arc::clone(&collector));

        let request = Request::new("GET", "http://127.0.0.1:1/");
        assert!(runner.run_task(1, request, &[]).is_err());
        assert_eq!(collector.report().total_results, 0);
    }
}
