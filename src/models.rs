// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Weekly,
    BiMonthly,
    Monthly,
    Annual,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly",
            PeriodType::BiMonthly => "bi_monthly",
            PeriodType::Monthly => "monthly",
            PeriodType::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<PeriodType> {
        match s {
            "weekly" => Some(PeriodType::Weekly),
            "bi_monthly" => Some(PeriodType::BiMonthly),
            "monthly" => Some(PeriodType::Monthly),
            "annual" => Some(PeriodType::Annual),
            _ => None,
        }
    }

    /// Single-letter tag used in deterministic period ids.
    pub fn tag(&self) -> char {
        match self {
            PeriodType::Weekly => 'W',
            PeriodType::BiMonthly => 'B',
            PeriodType::Monthly => 'M',
            PeriodType::Annual => 'A',
        }
    }

    /// The three granularities an outflow assignment is mirrored into.
    pub fn mirrored() -> [PeriodType; 3] {
        [
            PeriodType::Monthly,
            PeriodType::Weekly,
            PeriodType::BiMonthly,
        ]
    }
}

/// A canonical time window. Immutable once generated; `[start, end)` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePeriod {
    pub id: String,
    pub period_type: PeriodType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl SourcePeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date < self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Regular,
    CatchUp,
    Advance,
    ExtraPrincipal,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Regular => "regular",
            PaymentType::CatchUp => "catch_up",
            PaymentType::Advance => "advance",
            PaymentType::ExtraPrincipal => "extra_principal",
        }
    }

    pub fn parse(s: &str) -> Option<PaymentType> {
        match s {
            "regular" => Some(PaymentType::Regular),
            "catch_up" => Some(PaymentType::CatchUp),
            "advance" => Some(PaymentType::Advance),
            "extra_principal" => Some(PaymentType::ExtraPrincipal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutflowStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

impl OutflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutflowStatus::Pending => "PENDING",
            OutflowStatus::PartiallyPaid => "PARTIALLY_PAID",
            OutflowStatus::Paid => "PAID",
        }
    }

    pub fn parse(s: &str) -> Option<OutflowStatus> {
        match s {
            "PENDING" => Some(OutflowStatus::Pending),
            "PARTIALLY_PAID" => Some(OutflowStatus::PartiallyPaid),
            "PAID" => Some(OutflowStatus::Paid),
            _ => None,
        }
    }
}

/// One assignable portion of a transaction's amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    pub id: i64,
    pub transaction_id: i64,
    pub amount: Decimal,
    pub category_id: Option<i64>,
    pub budget_id: Option<i64>,
    pub budget_period_id: Option<String>,
    pub outflow_id: Option<i64>,
    pub payment_type: Option<PaymentType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: String,
    pub group_id: Option<String>,
    pub date: NaiveDate,
    pub payee: String,
    pub amount: Decimal,
    pub note: Option<String>,
}

/// A transaction together with its splits; the full payload events carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDoc {
    pub transaction: Transaction,
    pub splits: Vec<Split>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub amount: Decimal,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub is_everything_else: bool,
    pub category_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPeriod {
    pub budget_id: i64,
    pub period_id: String,
    pub user_id: String,
    pub spent: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outflow {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub amount_due: Decimal,
    pub due_date: NaiveDate,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutflowPeriod {
    pub id: i64,
    pub outflow_id: i64,
    pub period_id: String,
    pub period_type: PeriodType,
    pub amount_due: Decimal,
    pub amount_paid: Decimal,
    pub amount_unpaid: Decimal,
    pub extra_principal: Decimal,
    pub status: OutflowStatus,
    pub is_due_period: bool,
}

/// Reference to a split mirrored into an outflow period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitReference {
    pub transaction_id: i64,
    pub split_id: i64,
    pub amount: Decimal,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    pub period_id: String,
    pub spent: Decimal,
    pub budgeted: Decimal,
    pub due: Decimal,
    pub paid: Decimal,
    pub unpaid: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPeriod {
    pub group_id: String,
    pub period_id: String,
    pub total_spent: Decimal,
    pub total_budgeted: Decimal,
    pub total_due: Decimal,
    pub total_paid: Decimal,
}
