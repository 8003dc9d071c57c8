//! Role specification parsing.
//!
//! A role specification tells the loader which registry columns play which
//! part in the estimate. It uses an R-style survival formula:
//!
//! ```text
//! Surv(time, status) ~ age(age) + sex(sex) + entry(entry_date) + event(event_date)
//! ```
//!
//! `sex(...)` is optional; every other role is required. Any right-hand side
//! term that is not one of the recognised role functions is rejected, since
//! the engine does not support extra covariates.

use crate::error::{PrevalenceError, Result};
use serde::{Deserialize, Serialize};

/// A role a registry column can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Age at diagnosis, in years.
    Age,
    /// Sex, at most two levels.
    Sex,
    /// Date of diagnosis.
    Entry,
    /// Date of death or censoring.
    Event,
}

impl Role {
    fn from_function(name: &str) -> Option<Self> {
        match name {
            "age" => Some(Role::Age),
            "sex" => Some(Role::Sex),
            "entry" => Some(Role::Entry),
            "event" => Some(Role::Event),
            _ => None,
        }
    }

    /// Function name used in the formula.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Age => "age",
            Role::Sex => "sex",
            Role::Entry => "entry",
            Role::Event => "event",
        }
    }
}

/// Column identifiers resolved from a role specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Survival time column (days).
    pub time: String,
    /// Event indicator column (1 = event, 0 = censored).
    pub status: String,
    /// Age at diagnosis column.
    pub age: String,
    /// Optional sex column.
    pub sex: Option<String>,
    /// Diagnosis date column.
    pub entry: String,
    /// Event/censoring date column.
    pub event: String,
}

impl RoleSpec {
    /// Parse a role specification.
    ///
    /// # Examples
    /// ```
    /// use composable_prevalence::data::RoleSpec;
    /// let spec = RoleSpec::parse(
    ///     "Surv(time, status) ~ age(age) + sex(sex) + entry(diag) + event(death)",
    /// ).unwrap();
    /// assert_eq!(spec.entry, "diag");
    /// assert_eq!(spec.sex.as_deref(), Some("sex"));
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            PrevalenceError::RoleSpec("Formula must contain '~'".to_string())
        })?;

        let (time, status) = parse_surv(lhs.trim())?;

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(PrevalenceError::RoleSpec(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let mut age = None;
        let mut sex = None;
        let mut entry = None;
        let mut event = None;

        for term in rhs.split('+').map(str::trim) {
            if term.is_empty() {
                continue;
            }
            let (func, column) = parse_call(term)?;
            let role = Role::from_function(func).ok_or_else(|| {
                PrevalenceError::RoleSpec(format!(
                    "Unsupported term '{}': only age(), sex(), entry() and event() are allowed",
                    term
                ))
            })?;
            let slot = match role {
                Role::Age => &mut age,
                Role::Sex => &mut sex,
                Role::Entry => &mut entry,
                Role::Event => &mut event,
            };
            if slot.is_some() {
                return Err(PrevalenceError::RoleSpec(format!(
                    "Role '{}' is specified more than once",
                    role.name()
                )));
            }
            *slot = Some(column.to_string());
        }

        let missing = |role: Role| {
            PrevalenceError::RoleSpec(format!("Required role '{}' is not specified", role.name()))
        };

        Ok(Self {
            time,
            status,
            age: age.ok_or_else(|| missing(Role::Age))?,
            sex,
            entry: entry.ok_or_else(|| missing(Role::Entry))?,
            event: event.ok_or_else(|| missing(Role::Event))?,
        })
    }

    /// All column names referenced, in a stable order.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![
            self.time.as_str(),
            self.status.as_str(),
            self.age.as_str(),
            self.entry.as_str(),
            self.event.as_str(),
        ];
        if let Some(sex) = &self.sex {
            cols.push(sex.as_str());
        }
        cols
    }
}

impl std::fmt::Display for RoleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Surv({}, {}) ~ age({})", self.time, self.status, self.age)?;
        if let Some(sex) = &self.sex {
            write!(f, " + sex({})", sex)?;
        }
        write!(f, " + entry({}) + event({})", self.entry, self.event)
    }
}

fn parse_surv(lhs: &str) -> Result<(String, String)> {
    let (func, args) = parse_call(lhs)?;
    if func != "Surv" {
        return Err(PrevalenceError::RoleSpec(format!(
            "Left-hand side must be Surv(time, status), got '{}'",
            lhs
        )));
    }
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [time, status] if !time.is_empty() && !status.is_empty() => {
            Ok((time.to_string(), status.to_string()))
        }
        _ => Err(PrevalenceError::RoleSpec(format!(
            "Surv() takes exactly two columns, got '{}'",
            args
        ))),
    }
}

/// Split `name(arg)` into `("name", "arg")`.
fn parse_call(term: &str) -> Result<(&str, &str)> {
    let open = term.find('(');
    let close = term.rfind(')');
    match (open, close) {
        (Some(o), Some(c)) if o > 0 && c == term.len() - 1 && c > o + 1 => {
            Ok((term[..o].trim(), term[o + 1..c].trim()))
        }
        _ => Err(PrevalenceError::RoleSpec(format!(
            "Expected a term of the form role(column), got '{}'",
            term
        ))),
    }
}
