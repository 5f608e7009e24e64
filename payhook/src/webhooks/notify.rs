//! Payment confirmation notifications.
//!
//! Sending is a side effect of a successful materialization and never affects the webhook
//! response: it runs on its own task and failures are only logged.

use std::sync::Arc;

use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::{error, info};

use crate::errors::Result;
use crate::types::Provider;

/// Delivers a rendered message to a customer.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to_email: &str, to_name: Option<&str>, subject: &str, html_body: &str) -> Result<()>;
}

/// A notifier together with the branding used in customer-facing messages.
#[derive(Clone)]
pub struct Notifications {
    pub notifier: Arc<dyn Notifier>,
    pub company_name: String,
    pub support_email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    pub to_email: String,
    pub customer_name: Option<String>,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub provider: Provider,
    pub transaction_id: String,
    pub transaction_url: Option<String>,
}

impl PaymentConfirmation {
    pub fn subject(&self) -> String {
        format!("Payment Confirmation - Order {}", self.transaction_id)
    }

    /// Every interpolated value is escaped; names and links come from checkout metadata.
    pub fn render_html(&self, company_name: &str, support_email: &str) -> String {
        let greeting = match &self.customer_name {
            Some(name) => format!("Hello {},", encode_text(name)),
            None => "Hello,".to_string(),
        };
        let amount = encode_text(&format_amount(self.amount, &self.currency)).into_owned();
        let provider = self.provider.display_name();
        let transaction_id = encode_text(&self.transaction_id);
        let transaction_link = match &self.transaction_url {
            Some(url) if url.starts_with("https://") => format!(
                r#"<p><a href="{}">View your transaction</a></p>"#,
                encode_double_quoted_attribute(url)
            ),
            _ => String::new(),
        };
        let support_href = encode_double_quoted_attribute(support_email);
        let support_email = encode_text(support_email);
        let company_name = encode_text(company_name);

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Payment Confirmation</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .details {{ background: #f7f7f7; padding: 15px; border-radius: 4px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Thank you for your payment</h2>

        <p>{greeting}</p>

        <p>We have received your payment. Here are the details:</p>

        <div class="details">
            <p><strong>Amount:</strong> {amount}</p>
            <p><strong>Payment method:</strong> {provider}</p>
            <p><strong>Transaction ID:</strong> {transaction_id}</p>
        </div>

        {transaction_link}

        <div class="footer">
            <p>Questions about your order? Contact us at <a href="mailto:{support_href}">{support_email}</a>.</p>
            <p>{company_name}</p>
        </div>
    </div>
</body>
</html>"#
        )
    }
}

/// Format a minor-unit amount for display, e.g. `9900, "usd"` as `$99.00`.
pub fn format_amount(amount: i64, currency: &str) -> String {
    let currency = currency.to_uppercase();
    let sign = if amount < 0 { "-" } else { "" };
    let major = amount.unsigned_abs() / 100;
    let minor = amount.unsigned_abs() % 100;

    match currency.as_str() {
        "USD" => format!("{sign}${major}.{minor:02}"),
        "EUR" => format!("{sign}€{major}.{minor:02}"),
        "GBP" => format!("{sign}£{major}.{minor:02}"),
        _ => format!("{sign}{major}.{minor:02} {currency}"),
    }
}

/// Render and send a confirmation, logging the outcome.
pub async fn send_payment_confirmation(notifications: Option<&Notifications>, confirmation: &PaymentConfirmation) {
    let Some(notifications) = notifications else {
        info!(transaction_id = %confirmation.transaction_id, "Email not configured, skipping payment confirmation");
        return;
    };

    let body = confirmation.render_html(&notifications.company_name, &notifications.support_email);
    match notifications
        .notifier
        .send(
            &confirmation.to_email,
            confirmation.customer_name.as_deref(),
            &confirmation.subject(),
            &body,
        )
        .await
    {
        Ok(()) => info!(transaction_id = %confirmation.transaction_id, "Sent payment confirmation"),
        Err(e) => error!(
            transaction_id = %confirmation.transaction_id,
            error = %e,
            "Failed to send payment confirmation"
        ),
    }
}

/// Fire-and-forget variant used by the pipeline.
pub fn spawn_payment_confirmation(notifications: Option<Notifications>, confirmation: PaymentConfirmation) {
    tokio::spawn(async move {
        send_payment_confirmation(notifications.as_ref(), &confirmation).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::test_utils::RecordingNotifier;

    fn confirmation() -> PaymentConfirmation {
        PaymentConfirmation {
            to_email: "buyer@example.com".to_string(),
            customer_name: Some("Ada".to_string()),
            amount: 9900,
            currency: "usd".to_string(),
            provider: Provider::Stripe,
            transaction_id: "tx_123".to_string(),
            transaction_url: None,
        }
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(9900, "usd"), "$99.00");
        assert_eq!(format_amount(5, "EUR"), "€0.05");
        assert_eq!(format_amount(123456, "btc"), "1234.56 BTC");
    }

    #[test]
    fn test_confirmation_rendering() {
        let confirmation = confirmation();
        assert_eq!(confirmation.subject(), "Payment Confirmation - Order tx_123");

        let html = confirmation.render_html("Acme", "support@acme.test");
        assert!(html.contains("Hello Ada,"));
        assert!(html.contains("$99.00"));
        assert!(html.contains("Stripe"));
        assert!(html.contains("tx_123"));
        assert!(html.contains("support@acme.test"));
        assert!(!html.contains("View your transaction"));
    }

    #[test]
    fn test_transaction_link_rendered_when_present() {
        let mut confirmation = confirmation();
        confirmation.transaction_url = Some("https://commerce.coinbase.com/charges/ABC".to_string());
        let html = confirmation.render_html("Acme", "support@acme.test");
        assert!(html.contains(r#"href="https://commerce.coinbase.com/charges/ABC""#));
    }

    #[test]
    fn test_customer_supplied_values_are_escaped() {
        let mut confirmation = confirmation();
        confirmation.customer_name = Some(r#"<a href="https://evil.test">click</a>"#.to_string());
        confirmation.transaction_id = "tx_<b>1</b>".to_string();

        let html = confirmation.render_html("Acme & Sons", "support@acme.test");
        assert!(!html.contains(r#"<a href="https://evil.test">"#));
        assert!(html.contains("Hello &lt;a href=\"https://evil.test\"&gt;click&lt;/a&gt;,"));
        assert!(html.contains("tx_&lt;b&gt;1&lt;/b&gt;"));
        assert!(html.contains("Acme &amp; Sons"));
    }

    #[test]
    fn test_non_https_transaction_link_is_dropped() {
        let mut confirmation = confirmation();
        confirmation.transaction_url = Some("javascript:alert(1)".to_string());
        let html = confirmation.render_html("Acme", "support@acme.test");
        assert!(!html.contains("View your transaction"));
        assert!(!html.contains("javascript:"));

        confirmation.transaction_url = Some(r#"https://example.test/"><script>x</script>"#.to_string());
        let html = confirmation.render_html("Acme", "support@acme.test");
        assert!(!html.contains(r#"/"><script>"#));
        assert!(html.contains("https://example.test/&quot;"));
    }

    #[tokio::test]
    async fn test_send_uses_notifier() {
        let notifier = Arc::new(RecordingNotifier::default());
        let notifications = Notifications {
            notifier: notifier.clone(),
            company_name: "Acme".to_string(),
            support_email: "support@acme.test".to_string(),
        };

        send_payment_confirmation(Some(&notifications), &confirmation()).await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "buyer@example.com");
        assert_eq!(sent[0].subject, "Payment Confirmation - Order tx_123");
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _: &str, _: Option<&str>, _: &str, _: &str) -> Result<()> {
            Err(Error::Internal {
                operation: "send SMTP email: connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let notifications = Notifications {
            notifier: Arc::new(FailingNotifier),
            company_name: "Acme".to_string(),
            support_email: "support@acme.test".to_string(),
        };
        send_payment_confirmation(Some(&notifications), &confirmation()).await;
        send_payment_confirmation(None, &confirmation()).await;
    }
}
