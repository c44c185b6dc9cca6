use broker_core::{ErrorKind, FunctionalityClass, ProviderKind};
use metrics::{counter, histogram};
use std::time::Instant;

/// Broker metrics. Recording is a no-op when disabled in configuration or
/// when no recorder is installed.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry {
    enabled: bool,
}

impl Telemetry {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn record_invocation(
        &self,
        provider: ProviderKind,
        functionality: FunctionalityClass,
        outcome: &'static str,
    ) {
        if !self.enabled {
            return;
        }
        counter!(
            "broker_invocations_total",
            "provider" => provider.to_string(),
            "functionality" => functionality.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_failure(&self, kind: ErrorKind, code: &str) {
        if !self.enabled {
            return;
        }
        counter!(
            "broker_classified_failures_total",
            "kind" => kind.to_string(),
            "code" => code.to_string()
        )
        .increment(1);
    }

    pub fn record_tokens(&self, provider: ProviderKind, prompt: u64, completion: u64) {
        if !self.enabled {
            return;
        }
        counter!("broker_tokens_total", "provider" => provider.to_string(), "kind" => "prompt")
            .increment(prompt);
        counter!("broker_tokens_total", "provider" => provider.to_string(), "kind" => "completion")
            .increment(completion);
    }

    pub fn record_compaction(&self, result: &'static str) {
        if !self.enabled {
            return;
        }
        counter!("broker_compactions_total", "result" => result).increment(1);
    }

    pub fn record_write_failure(&self, step: &'static str) {
        if !self.enabled {
            return;
        }
        counter!("broker_follow_up_write_failures_total", "step" => step).increment(1);
    }

    pub fn record_deprecation(&self, provider: ProviderKind) {
        if !self.enabled {
            return;
        }
        counter!("broker_credentials_deprecated_total", "provider" => provider.to_string())
            .increment(1);
    }

    pub fn record_latency(&self, provider: ProviderKind, duration_ms: f64) {
        if !self.enabled {
            return;
        }
        histogram!("broker_invocation_duration_ms", "provider" => provider.to_string())
            .record(duration_ms);
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(true)
    }
}

pub struct InvocationTimer {
    start: Instant,
    provider: ProviderKind,
    telemetry: Telemetry,
}

impl InvocationTimer {
    pub fn new(telemetry: Telemetry, provider: ProviderKind) -> Self {
        Self {
            start: Instant::now(),
            provider,
            telemetry,
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed().as_millis() as f64;
        self.telemetry.record_latency(self.provider, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_counters_are_labelled() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let telemetry = Telemetry::new(true);
            telemetry.record_invocation(ProviderKind::OpenAi, FunctionalityClass::Chat, "generated");
            telemetry.record_failure(ErrorKind::RateLimited, "rate_limit_exceeded");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let invocations = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "broker_invocations_total")
            .expect("invocation counter recorded");
        assert!(matches!(invocations.3, DebugValue::Counter(1)));
        assert!(
            invocations
                .0
                .key()
                .labels()
                .any(|l| l.key() == "provider" && l.value() == "OPEN_AI")
        );
        assert!(
            snapshot
                .iter()
                .any(|(key, _, _, _)| key.key().name() == "broker_classified_failures_total")
        );
    }

    #[test]
    fn test_disabled_records_nothing() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let telemetry = Telemetry::new(false);
            telemetry.record_compaction("succeeded");
            telemetry.record_deprecation(ProviderKind::Anthropic);
        });

        assert!(snapshotter.snapshot().into_vec().is_empty());
    }
}
