// crates/decision-pipeline-core/src/primitives/order_line_fulfillment.rs
// ============================================================================
// Module: Order Line Fulfillment Risk Primitive
// Description: Supply-versus-demand risk for one order release line.
// Purpose: Flag order lines that projected supply will not cover by need-by date.
// Dependencies: crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! Lines missing the need-by date or either quantity are `UNKNOWN`. Holds put
//! a line at risk, closed statuses clear it, and otherwise projected available
//! quantity is compared to open quantity.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use time::Date;

use crate::core::decision::Confidence;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
use crate::core::time::format_date;
use crate::core::time::lenient;
use crate::primitives::BUILTIN_PRIMITIVE_VERSION;
use crate::primitives::BindError;
use crate::primitives::EvaluationError;
use crate::primitives::FetchCapability;
use crate::primitives::Primitive;
use crate::primitives::PrimitiveInput;
use crate::primitives::ResultParts;
use crate::primitives::Rule;
use crate::primitives::evidence_id_for;
use crate::primitives::json_map;

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Required inputs missing.
const UNKNOWN_MISSING_INPUTS: Rule = Rule {
    rule_id: "order_line_fulfillment_risk.unknown_missing_inputs",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["MISSING_REQUIRED_INPUTS"],
};

/// Line is on hold.
const AT_RISK_ON_HOLD: Rule = Rule {
    rule_id: "order_line_fulfillment_risk.at_risk_on_hold",
    state: DecisionState::AtRisk,
    confidence: Confidence::High,
    drivers: &["ON_HOLD"],
};

/// Line status is closed.
const NOT_AT_RISK_NOT_OPEN: Rule = Rule {
    rule_id: "order_line_fulfillment_risk.not_at_risk_not_open",
    state: DecisionState::NotAtRisk,
    confidence: Confidence::High,
    drivers: &["NOT_OPEN"],
};

/// Nothing left to ship.
const NOT_AT_RISK_NO_OPEN_QTY: Rule = Rule {
    rule_id: "order_line_fulfillment_risk.not_at_risk_no_open_qty",
    state: DecisionState::NotAtRisk,
    confidence: Confidence::High,
    drivers: &["NO_OPEN_QTY"],
};

/// Projected supply below open quantity.
const AT_RISK_PROJECTED_SHORT: Rule = Rule {
    rule_id: "order_line_fulfillment_risk.at_risk_projected_short",
    state: DecisionState::AtRisk,
    confidence: Confidence::High,
    drivers: &["PROJECTED_SHORT"],
};

/// Projected supply covers open quantity.
const NOT_AT_RISK_SUFFICIENT_SUPPLY: Rule = Rule {
    rule_id: "order_line_fulfillment_risk.not_at_risk_sufficient_supply",
    state: DecisionState::NotAtRisk,
    confidence: Confidence::High,
    drivers: &["SUFFICIENT_SUPPLY"],
};

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Order line risk settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderLineFulfillmentConfig {
    /// Upper-case statuses that mark a line as no longer open.
    pub closed_statuses: Vec<String>,
}

impl Default for OrderLineFulfillmentConfig {
    fn default() -> Self {
        Self {
            closed_statuses: vec!["CLOSED".to_string(), "CANCELLED".to_string()],
        }
    }
}

impl OrderLineFulfillmentConfig {
    /// Returns true when the status matches a closed status, ignoring case.
    #[must_use]
    pub fn is_closed(&self, status: &str) -> bool {
        let upper = status.to_uppercase();
        self.closed_statuses.iter().any(|closed| closed.to_uppercase() == upper)
    }
}

/// Facts for one order release line.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct OrderLineFulfillmentFacts {
    /// Date the customer needs the line.
    #[serde(default, deserialize_with = "lenient::date")]
    pub need_by_date: Option<Date>,
    /// Quantity still to ship.
    #[serde(default)]
    pub open_quantity: Option<f64>,
    /// Supply projected to be available by the need-by date.
    #[serde(default)]
    pub projected_available_quantity: Option<f64>,
    /// Source order status.
    #[serde(default)]
    pub order_status: Option<String>,
    /// Hold flag.
    #[serde(default)]
    pub is_on_hold: Option<bool>,
    /// Shortage at the release level.
    #[serde(default)]
    pub release_shortage_qty: Option<f64>,
    /// Shortage at the plant level.
    #[serde(default)]
    pub plant_shortage_qty: Option<f64>,
    /// Projected on-hand at end of day.
    #[serde(default)]
    pub projected_onhand_qty_eod: Option<f64>,
    /// Supply quantity.
    #[serde(default)]
    pub supply_qty: Option<f64>,
    /// Demand quantity.
    #[serde(default)]
    pub demand_qty: Option<f64>,
    /// Part number.
    #[serde(default)]
    pub partnum: Option<String>,
    /// Customer owning the order.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Order number, string or integer.
    #[serde(default)]
    pub ordernum: Option<Value>,
    /// Order line number.
    #[serde(default)]
    pub orderline: Option<Value>,
    /// Order release number.
    #[serde(default)]
    pub orderrelnum: Option<Value>,
    /// Shipping plant.
    #[serde(default)]
    pub plant: Option<String>,
    /// Shipping warehouse.
    #[serde(default)]
    pub warehouse: Option<String>,
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Order line fulfillment risk primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderLineFulfillmentRisk;

impl Primitive for OrderLineFulfillmentRisk {
    const NAME: &'static str = "order_line_fulfillment_risk";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "order_line_fulfillment_inputs",
        subject_type: "order_line",
    };
    const STATES: &'static [DecisionState] =
        &[DecisionState::AtRisk, DecisionState::NotAtRisk, DecisionState::Unknown];

    type Config = OrderLineFulfillmentConfig;
    type Facts = OrderLineFulfillmentFacts;

    fn validate_config(config: &Self::Config) -> Result<(), BindError> {
        if config.closed_statuses.iter().any(|status| status.trim().is_empty()) {
            return Err(BindError::invalid(Self::NAME, "closed_statuses must not contain blanks"));
        }
        Ok(())
    }

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let (rule, shortage) = classify(facts, config);
        let need_by_date = facts.need_by_date.map(format_date).transpose()?;

        let mut parts = ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, ""));
        parts.metrics = json_map(json!({
            "open_quantity": facts.open_quantity.unwrap_or(0.0),
            "projected_available_quantity": facts.projected_available_quantity.unwrap_or(0.0),
            "shortage_quantity": shortage,
        }));
        let optional_metrics = [
            ("need_by_date", need_by_date.clone().map(Value::String)),
            ("release_shortage_qty", facts.release_shortage_qty.map(Value::from)),
            ("plant_shortage_qty", facts.plant_shortage_qty.map(Value::from)),
            ("projected_onhand_qty_eod", facts.projected_onhand_qty_eod.map(Value::from)),
            ("supply_qty", facts.supply_qty.map(Value::from)),
            ("demand_qty", facts.demand_qty.map(Value::from)),
            ("ordernum", facts.ordernum.clone()),
            ("orderline", facts.orderline.clone()),
            ("orderrelnum", facts.orderrelnum.clone()),
            ("customer_id", non_blank(facts.customer_id.as_deref())),
        ];
        for (key, value) in optional_metrics {
            if let Some(value) = value.filter(|value| !value.is_null()) {
                parts.metrics.insert(key.to_string(), value);
            }
        }

        parts.thresholds = json_map(json!({ "closed_statuses": config.closed_statuses }));
        parts.references = json_map(json!({
            "applied_rule_id": rule.rule_id,
            "need_by_date": need_by_date,
            "open_quantity": facts.open_quantity,
            "projected_available_quantity": facts.projected_available_quantity,
            "order_status": facts.order_status,
            "is_on_hold": facts.is_on_hold,
            "closed_statuses": config.closed_statuses,
        }));
        let optional_references = [
            ("partnum", non_blank(facts.partnum.as_deref())),
            ("customer_id", non_blank(facts.customer_id.as_deref())),
            ("plant", non_blank(facts.plant.as_deref())),
            ("warehouse", non_blank(facts.warehouse.as_deref())),
        ];
        for (key, value) in optional_references {
            if let Some(value) = value {
                parts.references.insert(key.to_string(), value);
            }
        }
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}

/// Picks the first matching rule and the shortage it implies.
fn classify(
    facts: &OrderLineFulfillmentFacts,
    config: &OrderLineFulfillmentConfig,
) -> (&'static Rule, f64) {
    let (Some(_), Some(open), Some(projected)) =
        (facts.need_by_date, facts.open_quantity, facts.projected_available_quantity)
    else {
        return (&UNKNOWN_MISSING_INPUTS, 0.0);
    };
    if facts.is_on_hold == Some(true) {
        return (&AT_RISK_ON_HOLD, (open - projected).max(0.0));
    }
    if facts.order_status.as_deref().is_some_and(|status| config.is_closed(status)) {
        return (&NOT_AT_RISK_NOT_OPEN, 0.0);
    }
    if open <= 0.0 {
        return (&NOT_AT_RISK_NO_OPEN_QTY, 0.0);
    }
    if projected < open {
        return (&AT_RISK_PROJECTED_SHORT, open - projected);
    }
    (&NOT_AT_RISK_SUFFICIENT_SUPPLY, (open - projected).max(0.0))
}

/// Returns the text as a JSON string unless it is missing or blank.
fn non_blank(value: Option<&str>) -> Option<Value> {
    value.filter(|text| !text.is_empty()).map(|text| Value::String(text.to_string()))
}
