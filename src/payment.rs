//! Payment result pages.
//!
//! The gateway redirects the buyer here after checkout. The page only reports what the
//! redirect carried; no verification or reconciliation happens.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::i18n::{Direction, Locale, Translator};
use crate::routes::{links, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    #[serde(rename = "paypal")]
    PayPal,
    Stripe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Wallet,
    Card,
}

impl Gateway {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paypal" => Some(Gateway::PayPal),
            "stripe" => Some(Gateway::Stripe),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Gateway::PayPal => "paypal",
            Gateway::Stripe => "stripe",
        }
    }

    pub fn kind(self) -> GatewayKind {
        match self {
            Gateway::PayPal => GatewayKind::Wallet,
            Gateway::Stripe => GatewayKind::Card,
        }
    }

    fn label_key(self) -> &'static str {
        match self {
            Gateway::PayPal => "payment.gateway_paypal",
            Gateway::Stripe => "payment.gateway_stripe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Success,
    Failure,
    Cancel,
}

impl PaymentOutcome {
    fn title_key(self) -> &'static str {
        match self {
            PaymentOutcome::Success => "payment.success_title",
            PaymentOutcome::Failure => "payment.failure_title",
            PaymentOutcome::Cancel => "payment.cancel_title",
        }
    }
}

/// Query string of a gateway redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentQuery {
    pub license_key: Option<String>,
    pub invoice_number: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResultView {
    pub outcome: PaymentOutcome,
    pub gateway: Gateway,
    pub gateway_label: String,
    pub kind: GatewayKind,
    pub locale: Locale,
    pub direction: Direction,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Success without any identifier yet: the webhook has not landed.
    pub processing: bool,
    pub message: String,
    pub translations: BTreeMap<String, String>,
    pub links: BTreeMap<String, String>,
}

const MAX_FIELD_CHARS: usize = 255;

/// Trim, drop control characters and cap the length of a redirect parameter.
fn clean(value: Option<&String>) -> Option<String> {
    let cleaned: String = value?
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FIELD_CHARS)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn build_view(
    outcome: PaymentOutcome,
    gateway: Gateway,
    query: &PaymentQuery,
    translator: &Translator,
    locale: Locale,
) -> PaymentResultView {
    let gateway_label = translator.get(locale, gateway.label_key());
    let with_gateway = |key: &str| translator.get_with(locale, key, &[("gateway", &gateway_label)]);

    let license_key = clean(query.license_key.as_ref());
    let invoice_number = clean(query.invoice_number.as_ref());
    let transaction_id = clean(query.transaction_id.as_ref());
    let amount = clean(query.amount.as_ref()).map(|amount| {
        match clean(query.currency.as_ref()) {
            Some(currency) => format!("{} {}", amount, currency.to_ascii_uppercase()),
            None => amount,
        }
    });

    let has_identifier =
        license_key.is_some() || invoice_number.is_some() || transaction_id.is_some();

    let (message, processing) = match outcome {
        PaymentOutcome::Success if has_identifier => (with_gateway("payment.success_message"), false),
        PaymentOutcome::Success => (with_gateway("payment.processing_message"), true),
        PaymentOutcome::Failure => (
            clean(query.error.as_ref())
                .or_else(|| clean(query.message.as_ref()))
                .unwrap_or_else(|| with_gateway("payment.failure_default")),
            false,
        ),
        PaymentOutcome::Cancel => (with_gateway("payment.cancel_message"), false),
    };

    PaymentResultView {
        outcome,
        gateway,
        gateway_label: gateway_label.clone(),
        kind: gateway.kind(),
        locale,
        direction: locale.direction(),
        title: translator.get(locale, outcome.title_key()),
        license_key,
        invoice_number,
        transaction_id,
        amount,
        processing,
        message,
        translations: translator.section(locale, &["payment."]),
        links: links(&[Route::Home, Route::Login]),
    }
}
