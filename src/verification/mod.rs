//! Itinerary verification engine
//!
//! Rules-based checks run on the finished itinerary before it is returned.
//! Deterministic; a single failed rule rejects the itinerary.

use crate::cities::CityCatalog;
use crate::models::Itinerary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

/// Trait for verification rules
pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, itinerary: &Itinerary) -> VerificationCheckResult;
}

pub struct VerificationCheckResult {
    pub passed: bool,
    pub details: String,
}

impl VerificationCheckResult {
    fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub checks: Vec<RuleCheck>,
    pub issues: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

/// Verification engine that enforces rules
pub struct VerificationEngine {
    rules: Vec<Box<dyn VerificationRule>>,
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, itinerary: &Itinerary) -> VerificationReport {
        let mut checks = Vec::with_capacity(self.rules.len());
        let mut issues = Vec::new();

        for rule in &self.rules {
            let result = rule.verify(itinerary);

            if !result.passed {
                issues.push(format!("{}: {}", rule.name(), result.details));
            }

            checks.push(RuleCheck {
                rule_name: rule.name().to_string(),
                passed: result.passed,
                details: result.details,
            });
        }

        let verified = issues.is_empty();

        info!(
            rule_count = self.rules.len(),
            verified = verified,
            itinerary_id = %itinerary.itinerary_id,
            "Verification completed"
        );

        VerificationReport {
            verified,
            checks,
            issues,
            verified_at: Utc::now(),
        }
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Rules =================
//

/// Rule: a venue appears at most once per itinerary
pub struct DistinctVenuesRule;

impl VerificationRule for DistinctVenuesRule {
    fn name(&self) -> &'static str {
        "distinct_venues"
    }

    fn verify(&self, itinerary: &Itinerary) -> VerificationCheckResult {
        let mut seen = HashSet::new();
        let duplicates: Vec<&str> = itinerary
            .venues
            .iter()
            .filter(|v| !seen.insert(v.venue_id.as_str()))
            .map(|v| v.venue_id.as_str())
            .collect();

        if duplicates.is_empty() {
            VerificationCheckResult::pass(format!("{} distinct venues", itinerary.venues.len()))
        } else {
            VerificationCheckResult::fail(format!("duplicate venues: {}", duplicates.join(", ")))
        }
    }
}

/// Rule: every venue belongs to the itinerary city, by its recorded city
/// and by its address when the address names one
pub struct CityMatchRule {
    catalog: CityCatalog,
}

impl CityMatchRule {
    pub fn new(catalog: CityCatalog) -> Self {
        Self { catalog }
    }
}

impl VerificationRule for CityMatchRule {
    fn name(&self) -> &'static str {
        "city_match"
    }

    fn verify(&self, itinerary: &Itinerary) -> VerificationCheckResult {
        let expected = itinerary.city.name.as_str();

        let strays: Vec<String> = itinerary
            .venues
            .iter()
            .filter_map(|v| {
                let address_city = self.catalog.city_of_address(&v.address);
                if v.city != expected {
                    Some(format!("{} ({})", v.name, v.city))
                } else {
                    match address_city {
                        Some(found) if found != expected => Some(format!("{} ({})", v.name, found)),
                        _ => None,
                    }
                }
            })
            .collect();

        if strays.is_empty() {
            VerificationCheckResult::pass(format!("all venues in {}", expected))
        } else {
            VerificationCheckResult::fail(format!(
                "venues outside {}: {}",
                expected,
                strays.join(", ")
            ))
        }
    }
}

/// Rule: venues follow slot order
pub struct SlotOrderRule;

impl VerificationRule for SlotOrderRule {
    fn name(&self) -> &'static str {
        "slot_order"
    }

    fn verify(&self, itinerary: &Itinerary) -> VerificationCheckResult {
        let out_of_order = itinerary.venues.windows(2).find(|pair| {
            pair[0].slot_index >= pair[1].slot_index
                || (pair[0].date, pair[0].start) > (pair[1].date, pair[1].start)
                || (pair[0].day == pair[1].day && pair[0].end > pair[1].start)
        });

        match out_of_order {
            None => VerificationCheckResult::pass("venues ordered by day and time"),
            Some(pair) => VerificationCheckResult::fail(format!(
                "slot {} is not before slot {}",
                pair[0].slot_index, pair[1].slot_index
            )),
        }
    }
}

/// Rule: venue category is the slot category or its relaxation parent
pub struct CategoryCompatibleRule;

impl VerificationRule for CategoryCompatibleRule {
    fn name(&self) -> &'static str {
        "category_compatible"
    }

    fn verify(&self, itinerary: &Itinerary) -> VerificationCheckResult {
        let mismatched: Vec<String> = itinerary
            .venues
            .iter()
            .filter(|v| !v.slot_category.accepts(v.category))
            .map(|v| format!("slot {} wants {}, got {}", v.slot_index, v.slot_category, v.category))
            .collect();

        if mismatched.is_empty() {
            VerificationCheckResult::pass("all venue categories compatible")
        } else {
            VerificationCheckResult::fail(mismatched.join("; "))
        }
    }
}

/// Create a verification engine with the standard itinerary rules
pub fn create_default_verification_engine() -> VerificationEngine {
    let mut engine = VerificationEngine::new();
    engine.add_rule(Box::new(DistinctVenuesRule));
    engine.add_rule(Box::new(CityMatchRule::new(CityCatalog::korea())));
    engine.add_rule(Box::new(SlotOrderRule));
    engine.add_rule(Box::new(CategoryCompatibleRule));
    engine
}

//
// ================= Tests =================
//
