//! Billing cycle model.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Recurrence interval governing how far the next due date advances after a
/// charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "yearly" => BillingCycle::Yearly,
            _ => BillingCycle::Monthly,
        }
    }

    /// Calendar months covered by one cycle.
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }

    /// The due date one cycle after `from`.
    ///
    /// When the source day-of-month does not exist in the target month the
    /// date clamps to the last day of that month (Jan 31 + 1 month = Feb 28,
    /// or Feb 29 in a leap year). The clamp is sticky: a clamped date does
    /// not resurrect the original day-of-month on later advances.
    pub fn next_date(&self, from: NaiveDate) -> NaiveDate {
        from + Months::new(self.months())
    }
}
