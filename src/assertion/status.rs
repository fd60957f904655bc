//! Status assertions over `response.status`.

use super::{record, Check};
use crate::context::SharedContext;
use serde_json::{json, Value};

fn actual(status: Option<u16>) -> Option<Value> {
    Some(status.map_or(Value::Null, Value::from))
}

pub(crate) fn to_have_status(status: Option<u16>, expected: u16) -> Check {
    Check::new("status", status == Some(expected), actual(status), Some(Value::from(expected)))
}

/// Inclusive on both ends.
pub(crate) fn to_be_in_range(status: Option<u16>, min: u16, max: u16) -> Check {
    Check::new(
        "status in range",
        status.is_some_and(|s| (min..=max).contains(&s)),
        actual(status),
        Some(json!([min, max])),
    )
}

#[derive(Debug, Clone)]
pub struct StatusAssertions {
    context: SharedContext,
    status: Option<u16>,
}

impl StatusAssertions {
    pub fn new(context: &SharedContext, status: Option<u16>) -> Self {
        Self {
            context: context.clone(),
            status,
        }
    }

    pub fn from_response(context: &SharedContext) -> Self {
        let status = context.with(|ctx| ctx.response.status);
        Self::new(context, status)
    }

    fn record(&self, check: Check, message: Option<&str>) -> &Self {
        record(&self.context, check, message);
        self
    }

    pub fn to_have_status(&self, expected: u16, message: Option<&str>) -> &Self {
        self.record(to_have_status(self.status, expected), message)
    }

    pub fn to_be_in_range(&self, min: u16, max: u16, message: Option<&str>) -> &Self {
        self.record(to_be_in_range(self.status, min, max), message)
    }

    fn named(&self, name: &str, check: Check) -> &Self {
        self.record(
            Check {
                name: name.to_string(),
                ..check
            },
            None,
        )
    }

    pub fn expect_ok(&self) -> &Self {
        self.named("status ok", to_have_status(self.status, 200))
    }

    pub fn expect_created(&self) -> &Self {
        self.named("status created", to_have_status(self.status, 201))
    }

    pub fn expect_bad_request(&self) -> &Self {
        self.named("status bad request", to_have_status(self.status, 400))
    }

    pub fn expect_unauthorized(&self) -> &Self {
        self.named("status unauthorized", to_have_status(self.status, 401))
    }

    pub fn expect_forbidden(&self) -> &Self {
        self.named("status forbidden", to_have_status(self.status, 403))
    }

    pub fn expect_not_found(&self) -> &Self {
        self.named("status not found", to_have_status(self.status, 404))
    }

    /// Any status in 500..=599.
    pub fn expect_server_error(&self) -> &Self {
        self.named("status server error", to_be_in_range(self.status, 500, 599))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestStatus;

    fn passes(status: Option<u16>, f: impl Fn(&StatusAssertions)) -> bool {
        let ctx = SharedContext::default();
        f(&StatusAssertions::new(&ctx, status));
        ctx.snapshot().assertions[0].status == TestStatus::Pass
    }

    #[test]
    fn test_server_error_range() {
        let check = |s| passes(Some(s), |a| {
            a.expect_server_error();
        });
        assert!(check(500));
        assert!(check(599));
        assert!(!check(499));
        assert!(!check(600));
    }

    #[test]
    fn test_named_shortcuts() {
        assert!(passes(Some(200), |a| { a.expect_ok(); }));
        assert!(passes(Some(201), |a| { a.expect_created(); }));
        assert!(passes(Some(400), |a| { a.expect_bad_request(); }));
        assert!(passes(Some(401), |a| { a.expect_unauthorized(); }));
        assert!(passes(Some(403), |a| { a.expect_forbidden(); }));
        assert!(passes(Some(404), |a| { a.expect_not_found(); }));
        assert!(!passes(Some(200), |a| { a.expect_created(); }));
        assert!(!passes(None, |a| { a.expect_ok(); }));
    }

    #[test]
    fn test_exact_and_range_chain() {
        let ctx = SharedContext::default();
        StatusAssertions::new(&ctx, Some(204))
            .to_have_status(204, None)
            .to_be_in_range(200, 299, None)
            .to_be_in_range(300, 399, None);

        let snapshot = ctx.snapshot();
        let statuses: Vec<_> = snapshot.assertions.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![TestStatus::Pass, TestStatus::Pass, TestStatus::Fail]
        );
        assert_eq!(snapshot.assertions[1].expected, Some(json!([200, 299])));
    }
}
