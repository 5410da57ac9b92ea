use crate::models::CreditApplication;
use bigdecimal::BigDecimal;

/// Accepted identity-document filename extension.
const DOCUMENT_EXTENSION: &str = ".file";

/// Identifiers for the closed set of validation rules.
///
/// Each rule is a pure predicate over an application's persisted state:
/// it never mutates and never fails — any internal fault (missing
/// attachment, undecodable content, absent operand) degrades to
/// "not satisfied".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleName {
    IdentityDocumentFormat,
    IdentityDocumentFullname,
    RequestedAmountVsMonthlyIncome,
}

impl RuleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::IdentityDocumentFormat => "identity_document_format",
            RuleName::IdentityDocumentFullname => "identity_document_fullname",
            RuleName::RequestedAmountVsMonthlyIncome => "requested_amount_vs_monthly_income",
        }
    }

    pub fn parse(value: &str) -> Option<RuleName> {
        match value {
            "identity_document_format" => Some(RuleName::IdentityDocumentFormat),
            "identity_document_fullname" => Some(RuleName::IdentityDocumentFullname),
            "requested_amount_vs_monthly_income" => Some(RuleName::RequestedAmountVsMonthlyIncome),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Country-specific constants a strategy feeds into rule evaluation.
/// Future countries may use a different marker or ratio, so neither is a
/// global constant.
#[derive(Debug, Clone)]
pub struct RuleParams {
    /// Marker token the decoded identity document must contain.
    pub document_marker: &'static str,
    /// Maximum requested_amount as a fraction of monthly_income.
    pub income_ratio: BigDecimal,
}

/// Evaluates one rule against the application's current state.
pub fn satisfied_by(rule: RuleName, app: &CreditApplication, params: &RuleParams) -> bool {
    match rule {
        RuleName::IdentityDocumentFormat => {
            identity_document_format(app, params.document_marker)
        }
        RuleName::IdentityDocumentFullname => identity_document_fullname(app),
        RuleName::RequestedAmountVsMonthlyIncome => {
            requested_amount_vs_monthly_income(app, &params.income_ratio)
        }
    }
}

/// The attached document's filename has the accepted extension and its
/// decoded textual content contains the country's marker token.
fn identity_document_format(app: &CreditApplication, marker: &str) -> bool {
    let Some(filename) = app.identity_document_filename.as_deref() else {
        return false;
    };
    if !filename.to_lowercase().ends_with(DOCUMENT_EXTENSION) {
        return false;
    }
    let Some(bytes) = app.identity_document_content.as_deref() else {
        return false;
    };
    match std::str::from_utf8(bytes) {
        Ok(content) => content.to_uppercase().contains(marker),
        Err(e) => {
            tracing::warn!(
                "identity_document_format: undecodable document for application {}: {}",
                app.id,
                e
            );
            false
        }
    }
}

/// The applicant's declared full name, whitespace/case-normalized, equals
/// the name+lastname reported by banking data. False if either side is
/// absent or blank.
fn identity_document_fullname(app: &CreditApplication) -> bool {
    let banking = match app.banking_data.as_ref() {
        Some(data) => data,
        None => return false,
    };
    let name = banking.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let lastname = banking
        .get("lastname")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if app.full_name.trim().is_empty() || name.trim().is_empty() || lastname.trim().is_empty() {
        return false;
    }

    let from_banking = normalize_name(&format!("{} {}", name, lastname));
    let declared = normalize_name(&app.full_name);

    from_banking == declared
}

/// requested_amount <= ratio * monthly_income, non-strict. False when
/// either operand is absent.
fn requested_amount_vs_monthly_income(app: &CreditApplication, ratio: &BigDecimal) -> bool {
    let Some(monthly_income) = app.monthly_income.as_ref() else {
        return false;
    };
    let threshold = monthly_income * ratio;
    app.requested_amount <= threshold
}

/// Collapses repeated whitespace and lowercases for name comparison.
pub fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
