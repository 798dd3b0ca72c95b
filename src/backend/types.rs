use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// A row type stored in one table of the hosted store.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Table name, also used as the cache key prefix for this entity.
  fn table() -> &'static str;

  /// Primary key
  fn id(&self) -> &str;

  /// One-line description for list output
  fn summary(&self) -> String;
}

/// A customer account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
  pub id: String,
  pub name: String,
  pub contact_name: Option<String>,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub billing_address: Option<String>,
  #[serde(default = "default_true")]
  pub active: bool,
  pub created_at: Option<DateTime<Utc>>,
}

/// A serviced site belonging to an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
  pub id: String,
  pub account_id: String,
  pub name: String,
  pub address: Option<String>,
  pub kind: Option<String>, // "warehouse", "kitchen", "office", ...
  pub created_at: Option<DateTime<Utc>>,
}

/// A field collection: what a technician found at a trap on a visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
  pub id: String,
  pub space_id: String,
  pub technician_id: Option<String>,
  pub collected_at: DateTime<Utc>,
  pub trap_code: Option<String>,
  pub pest_type: String,
  #[serde(default)]
  pub count: u32,
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  Technician,
  Client,
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Role::Admin => "admin",
      Role::Technician => "technician",
      Role::Client => "client",
    };
    f.write_str(name)
  }
}

/// A console user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub email: String,
  pub full_name: Option<String>,
  pub role: Role,
  /// Set for client users, who only see their own account
  pub account_id: Option<String>,
}

fn default_true() -> bool {
  true
}

impl Entity for Account {
  fn table() -> &'static str {
    "accounts"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    let status = if self.active { "" } else { " (inactive)" };
    match &self.contact_name {
      Some(contact) => format!("{}  {}{}  [{}]", self.id, self.name, status, contact),
      None => format!("{}  {}{}", self.id, self.name, status),
    }
  }
}

impl Entity for Space {
  fn table() -> &'static str {
    "spaces"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{}  {}  {}",
      self.id,
      self.name,
      self.kind.as_deref().unwrap_or("-")
    )
  }
}

impl Entity for Collection {
  fn table() -> &'static str {
    "collections"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{}  {}  {} x{}  trap {}",
      self.id,
      self.collected_at.format("%Y-%m-%d %H:%M"),
      self.pest_type,
      self.count,
      self.trap_code.as_deref().unwrap_or("-")
    )
  }
}

impl Entity for User {
  fn table() -> &'static str {
    "users"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{}  {}  {}  {}",
      self.id,
      self.email,
      self.full_name.as_deref().unwrap_or("-"),
      self.role
    )
  }
}
