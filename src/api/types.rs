//! Domain entities as held by the client.
//!
//! The backend owns every one of these; the client only keeps read-through
//! copies. Optional fields default so partial payloads still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Implements `as_str`, `Display` and `FromStr` for a snake_case status enum.
macro_rules! string_enum {
  ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
    impl $name {
      pub const ALL: &'static [$name] = &[$($name::$variant),+];

      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $text),+
        }
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl FromStr for $name {
      type Err = String;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
          $($text => Ok($name::$variant),)+
          other => Err(format!(
            "unknown {} '{}' (expected one of: {})",
            stringify!($name),
            other,
            [$($text),+].join(", ")
          )),
        }
      }
    }
  };
}

// ============================================================================
// Ticketing
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
  #[default]
  Open,
  InProgress,
  Waiting,
  Resolved,
  Closed,
}

string_enum!(TicketStatus {
  Open => "open",
  InProgress => "in_progress",
  Waiting => "waiting",
  Resolved => "resolved",
  Closed => "closed",
});

impl TicketStatus {
  /// Resolved and closed tickets need no further work.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Resolved | Self::Closed)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
  Low,
  #[default]
  Normal,
  High,
  Urgent,
}

string_enum!(TicketPriority {
  Low => "low",
  Normal => "normal",
  High => "high",
  Urgent => "urgent",
});

/// Who a ticket is raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketTarget {
  Tenant,
  Partner,
  Platform,
}

string_enum!(TicketTarget {
  Tenant => "tenant",
  Partner => "partner",
  Platform => "platform",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
  pub id: String,
  #[serde(default)]
  pub ticket_number: Option<String>,
  pub subject: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub status: TicketStatus,
  #[serde(default)]
  pub priority: TicketPriority,
  #[serde(default)]
  pub target_type: Option<TicketTarget>,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub tenant_id: Option<String>,
  #[serde(default)]
  pub partner_id: Option<String>,
  #[serde(default)]
  pub assigned_to_user_id: Option<String>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketMessage {
  pub id: String,
  #[serde(default)]
  pub ticket_id: Option<String>,
  #[serde(alias = "body")]
  pub message: String,
  #[serde(default)]
  pub author_user_id: Option<String>,
  #[serde(default)]
  pub is_internal: bool,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTicket {
  pub subject: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub target_type: Option<TicketTarget>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<TicketPriority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tenant_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub partner_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTicket {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<TicketStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<TicketPriority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTicketMessage {
  pub message: String,
  #[serde(default)]
  pub is_internal: bool,
  /// Move the ticket to this status together with the reply
  #[serde(skip_serializing_if = "Option::is_none")]
  pub new_status: Option<TicketStatus>,
}

// ============================================================================
// Partners
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
  #[default]
  Pending,
  Active,
  Suspended,
  Terminated,
  Archived,
}

string_enum!(PartnerStatus {
  Pending => "pending",
  Active => "active",
  Suspended => "suspended",
  Terminated => "terminated",
  Archived => "archived",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
  pub id: String,
  #[serde(default)]
  pub partner_number: Option<String>,
  pub company_name: String,
  #[serde(default)]
  pub legal_name: Option<String>,
  #[serde(default)]
  pub status: PartnerStatus,
  #[serde(default)]
  pub tier: Option<String>,
  #[serde(default)]
  pub primary_email: Option<String>,
  #[serde(default)]
  pub billing_email: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub commission_model: Option<String>,
  #[serde(default)]
  pub default_commission_rate: Option<f64>,
  #[serde(default)]
  pub total_customers: u64,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePartner {
  pub company_name: String,
  pub primary_email: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub legal_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tier: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub commission_model: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default_commission_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePartner {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub company_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<PartnerStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tier: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub primary_email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default_commission_rate: Option<f64>,
}

// ============================================================================
// API keys
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub scopes: Vec<String>,
  #[serde(default)]
  pub description: Option<String>,
  /// Leading characters of the key, safe to display
  #[serde(default, alias = "key_preview")]
  pub prefix: Option<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub expires_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub last_used_at: Option<DateTime<Utc>>,
}

/// Response to key creation; `api_key` is the only time the secret is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCreated {
  #[serde(flatten)]
  pub key: ApiKey,
  pub api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateApiKey {
  pub name: String,
  #[serde(default)]
  pub scopes: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateApiKey {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scopes: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

// ============================================================================
// Webhooks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
  pub id: String,
  pub url: String,
  #[serde(default)]
  pub events: Vec<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
  #[serde(default)]
  pub success_count: u64,
  #[serde(default)]
  pub failure_count: u64,
  #[serde(default)]
  pub last_triggered_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateWebhook {
  pub url: String,
  pub events: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWebhook {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub events: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTestResult {
  pub success: bool,
  #[serde(default)]
  pub status_code: Option<u16>,
  #[serde(default)]
  pub response_time_ms: Option<u64>,
  #[serde(default)]
  pub error_message: Option<String>,
}

// ============================================================================
// Communications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
  Email,
  Sms,
  Push,
  Webhook,
}

string_enum!(Channel {
  Email => "email",
  Sms => "sms",
  Push => "push",
  Webhook => "webhook",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
  pub id: String,
  pub name: String,
  pub channel: Channel,
  #[serde(default)]
  pub subject: Option<String>,
  #[serde(default, alias = "text_body")]
  pub body: Option<String>,
  #[serde(default)]
  pub variables: Vec<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTemplate {
  pub name: String,
  pub channel: Option<Channel>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default)]
  pub variables: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTemplate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub variables: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
  Pending,
  Sent,
  Delivered,
  Failed,
  Bounced,
}

string_enum!(DeliveryStatus {
  Pending => "pending",
  Sent => "sent",
  Delivered => "delivered",
  Failed => "failed",
  Bounced => "bounced",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationLog {
  pub id: String,
  pub channel: Channel,
  pub recipient: String,
  pub status: DeliveryStatus,
  #[serde(default)]
  pub subject: Option<String>,
  #[serde(default)]
  pub template_id: Option<String>,
  #[serde(default)]
  pub error_message: Option<String>,
  #[serde(default)]
  pub sent_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Billing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
  Draft,
  Open,
  Paid,
  Void,
  Overdue,
}

string_enum!(InvoiceStatus {
  Draft => "draft",
  Open => "open",
  Paid => "paid",
  Void => "void",
  Overdue => "overdue",
});

/// Amounts are in minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
  #[serde(alias = "invoice_id")]
  pub id: String,
  #[serde(default)]
  pub invoice_number: Option<String>,
  pub status: InvoiceStatus,
  #[serde(default)]
  pub tenant_id: Option<String>,
  #[serde(default)]
  pub customer_id: Option<String>,
  #[serde(default = "default_currency")]
  pub currency: String,
  #[serde(default)]
  pub total_amount: i64,
  #[serde(default)]
  pub amount_due: i64,
  #[serde(default)]
  pub issue_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub paid_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Monitoring
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheck {
  pub status: String,
  #[serde(default)]
  pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
  pub status: String,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default, alias = "services")]
  pub checks: BTreeMap<String, ServiceCheck>,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

impl HealthReport {
  pub fn is_healthy(&self) -> bool {
    matches!(self.status.as_str(), "healthy" | "ok")
  }

  /// Names of the checks not reporting healthy.
  pub fn failing_checks(&self) -> Vec<&str> {
    self
      .checks
      .iter()
      .filter(|(_, check)| !matches!(check.status.as_str(), "healthy" | "ok"))
      .map(|(name, _)| name.as_str())
      .collect()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringMetrics {
  #[serde(default)]
  pub error_rate: f64,
  #[serde(default)]
  pub critical_errors: u64,
  #[serde(default)]
  pub warning_count: u64,
  #[serde(default)]
  pub total_requests: u64,
  #[serde(default)]
  pub avg_response_time_ms: f64,
  #[serde(default)]
  pub p95_response_time_ms: Option<f64>,
  #[serde(default)]
  pub period: Option<String>,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
  true
}

fn default_currency() -> String {
  "USD".to_string()
}
