//! Reduction of finished contexts into reportable results.

use crate::model::*;
use std::fmt::Write as _;

/// Turns contexts into [`TestResult`] lists and summaries. Every
/// method is a read-only projection of its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestResultProcessor;

impl TestResultProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Results for one finished script run.
    ///
    /// Without named tests the script gets one rollup result, failing
    /// when any assertion failed. With named tests there is one
    /// result per test instead. Every assertion is appended after
    /// either form.
    pub fn process_results(
        &self,
        context: &TestContext,
        script_id: &str,
        script_name: &str,
        duration: u64,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(context.tests.len().max(1) + context.assertions.len());

        if context.tests.is_empty() {
            let failed = context.failed_assertions();
            let rollup = if failed > 0 {
                TestResult::new(script_name, TestStatus::Fail)
                    .with_message(format!("{failed} assertion(s) failed"))
            } else {
                TestResult::new(script_name, TestStatus::Pass).with_message(format!(
                    "{} assertion(s) passed",
                    context.assertions.len()
                ))
            };
            results.push(rollup.with_id(script_id).with_duration(duration));
        } else {
            let shares = split_duration(duration, context.tests.len());
            for ((index, test), share) in context.tests.iter().enumerate().zip(shares) {
                let status = if test.passed {
                    TestStatus::Pass
                } else {
                    TestStatus::Fail
                };
                results.push(
                    TestResult::new(test.name.clone(), status)
                        .with_id(format!("{script_id}:test:{index}"))
                        .with_duration(share),
                );
            }
        }

        results.extend(context.assertions.iter().enumerate().map(|(index, assertion)| {
            let mut result = assertion.clone();
            if result.id.is_none() {
                result.id = Some(format!("{script_id}:assertion:{index}"));
            }
            result
        }));
        results
    }

    pub fn create_skip_result(&self, script_id: &str, script_name: &str) -> TestResult {
        TestResult::new(script_name, TestStatus::Skip)
            .with_id(script_id)
            .with_message("Script is disabled")
    }

    pub fn create_error_result(
        &self,
        script_id: &str,
        script_name: &str,
        error: &str,
        duration: u64,
    ) -> TestResult {
        TestResult::new(script_name, TestStatus::Error)
            .with_id(script_id)
            .with_message(format!("Script execution failed: {error}"))
            .with_error(error)
            .with_duration(duration)
    }

    /// Counts by status and the pass rate over non-skipped results,
    /// rounded to the nearest percent. An empty denominator gives 0.
    pub fn generate_summary(&self, results: &[TestResult]) -> TestSummary {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        let passed = count(TestStatus::Pass);
        let failed = count(TestStatus::Fail);
        let skipped = count(TestStatus::Skip);
        let errors = count(TestStatus::Error);

        let considered = passed + failed + errors;
        let success_rate = if considered == 0 {
            0
        } else {
            (passed as f64 / considered as f64 * 100.0).round() as u32
        };

        TestSummary {
            total: results.len(),
            passed,
            failed,
            skipped,
            errors,
            total_duration: results.iter().map(|r| r.duration).sum(),
            success_rate,
        }
    }

    /// Flatten batch entries into one list, in entry order.
    pub fn process_batch_results(&self, entries: &[BatchEntry]) -> Vec<TestResult> {
        entries
            .iter()
            .flat_map(|entry| {
                if !entry.enabled {
                    return vec![self.create_skip_result(&entry.script_id, &entry.script_name)];
                }
                match &entry.error {
                    Some(error) => {
                        let mut results = vec![self.create_error_result(
                            &entry.script_id,
                            &entry.script_name,
                            error,
                            entry.duration,
                        )];
                        results.extend(entry.context.assertions.iter().cloned());
                        results
                    }
                    None => self.process_results(
                        &entry.context,
                        &entry.script_id,
                        &entry.script_name,
                        entry.duration,
                    ),
                }
            })
            .collect()
    }

    /// Failed and errored results.
    pub fn get_failed_tests(&self, results: &[TestResult]) -> Vec<TestResult> {
        results
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Fail | TestStatus::Error))
            .cloned()
            .collect()
    }

    /// Slowest first. Ties keep their original order.
    pub fn sort_by_duration(&self, results: &[TestResult]) -> Vec<TestResult> {
        let mut sorted = results.to_vec();
        sorted.sort_by(|a, b| b.duration.cmp(&a.duration));
        sorted
    }

    pub fn filter_by_status(&self, results: &[TestResult], status: TestStatus) -> Vec<TestResult> {
        results
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Plain-text report: one line per result, then the summary.
    pub fn format_for_reporting(&self, results: &[TestResult]) -> String {
        let mut out = String::new();
        for result in results {
            let _ = write!(
                out,
                "[{}] {} ({} ms)",
                result.status.as_str().to_uppercase(),
                result.name,
                result.duration
            );
            if let Some(message) = &result.message {
                let _ = write!(out, " - {message}");
            }
            if let Some(error) = &result.error {
                let _ = write!(out, " [error: {error}]");
            }
            out.push('\n');
        }

        let summary = self.generate_summary(results);
        let _ = writeln!(
            out,
            "Total: {}, Passed: {}, Failed: {}, Skipped: {}, Errors: {}, Success rate: {}%, Duration: {} ms",
            summary.total,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.errors,
            summary.success_rate,
            summary.total_duration
        );
        out
    }
}

/// Split `total` into `parts` shares; the remainder goes to the first.
fn split_duration(total: u64, parts: usize) -> Vec<u64> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_u64 = parts as u64;
    let share = total / parts_u64;
    let mut shares = vec![share; parts];
    shares[0] += total % parts_u64;
    shares
}
