use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// ============ Taxpayer Models ============

/// Normalized result of an RNC/Cédula lookup.
///
/// Serialized field names follow the labels shown on the DGII page so the
/// JSON shape stays stable for existing consumers. Every string field is
/// always present once a lookup succeeded; missing upstream rows become `""`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxpayerProfile {
    /// Cédula or RNC as reported by the source.
    #[serde(rename = "cedula_rnc")]
    pub identifier: String,
    /// Nombre / Razón Social.
    #[serde(rename = "nombre_razon_social")]
    pub legal_name: String,
    #[serde(rename = "nombre_comercial")]
    pub trade_name: String,
    #[serde(rename = "categoria")]
    pub category: String,
    #[serde(rename = "regimen_de_pagos")]
    pub payment_regime: String,
    #[serde(rename = "estado")]
    pub status: String,
    #[serde(rename = "actividad_economica")]
    pub economic_activity: String,
    #[serde(rename = "administracion_local")]
    pub local_administration: String,
    #[serde(rename = "facturador_electronico")]
    pub electronic_invoicing: String,
    #[serde(rename = "licencias_de_comercializacion_de_vhm")]
    pub vhm_license: String,
    /// Sanitized identifier that was looked up.
    #[serde(rename = "rnc_consultado")]
    pub queried_identifier: String,
    /// True when the profile was served from the cache store.
    #[serde(rename = "cache")]
    pub from_cache: bool,
}

/// The fixed set of profile fields a source row can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Identifier,
    LegalName,
    TradeName,
    Category,
    PaymentRegime,
    Status,
    EconomicActivity,
    LocalAdministration,
    ElectronicInvoicing,
    VhmLicense,
}

impl ProfileField {
    pub const ALL: [ProfileField; 10] = [
        ProfileField::Identifier,
        ProfileField::LegalName,
        ProfileField::TradeName,
        ProfileField::Category,
        ProfileField::PaymentRegime,
        ProfileField::Status,
        ProfileField::EconomicActivity,
        ProfileField::LocalAdministration,
        ProfileField::ElectronicInvoicing,
        ProfileField::VhmLicense,
    ];

    /// Serialized key of the field.
    pub fn key(self) -> &'static str {
        match self {
            ProfileField::Identifier => "cedula_rnc",
            ProfileField::LegalName => "nombre_razon_social",
            ProfileField::TradeName => "nombre_comercial",
            ProfileField::Category => "categoria",
            ProfileField::PaymentRegime => "regimen_de_pagos",
            ProfileField::Status => "estado",
            ProfileField::EconomicActivity => "actividad_economica",
            ProfileField::LocalAdministration => "administracion_local",
            ProfileField::ElectronicInvoicing => "facturador_electronico",
            ProfileField::VhmLicense => "licencias_de_comercializacion_de_vhm",
        }
    }
}

impl TaxpayerProfile {
    /// Builds a profile from parsed field values. Fields without a value stay empty.
    pub fn from_fields<I>(fields: I, queried_identifier: &str, from_cache: bool) -> Self
    where
        I: IntoIterator<Item = (ProfileField, String)>,
    {
        let mut profile = TaxpayerProfile {
            queried_identifier: queried_identifier.to_string(),
            from_cache,
            ..Default::default()
        };
        for (field, value) in fields {
            profile.set(field, value);
        }
        profile
    }

    pub fn set(&mut self, field: ProfileField, value: String) {
        let slot = match field {
            ProfileField::Identifier => &mut self.identifier,
            ProfileField::LegalName => &mut self.legal_name,
            ProfileField::TradeName => &mut self.trade_name,
            ProfileField::Category => &mut self.category,
            ProfileField::PaymentRegime => &mut self.payment_regime,
            ProfileField::Status => &mut self.status,
            ProfileField::EconomicActivity => &mut self.economic_activity,
            ProfileField::LocalAdministration => &mut self.local_administration,
            ProfileField::ElectronicInvoicing => &mut self.electronic_invoicing,
            ProfileField::VhmLicense => &mut self.vhm_license,
        };
        *slot = value;
    }

    pub fn get(&self, field: ProfileField) -> &str {
        match field {
            ProfileField::Identifier => &self.identifier,
            ProfileField::LegalName => &self.legal_name,
            ProfileField::TradeName => &self.trade_name,
            ProfileField::Category => &self.category,
            ProfileField::PaymentRegime => &self.payment_regime,
            ProfileField::Status => &self.status,
            ProfileField::EconomicActivity => &self.economic_activity,
            ProfileField::LocalAdministration => &self.local_administration,
            ProfileField::ElectronicInvoicing => &self.electronic_invoicing,
            ProfileField::VhmLicense => &self.vhm_license,
        }
    }
}

/// Persisted cache unit. Only successful lookups are ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub identifier: String,
    pub profile: TaxpayerProfile,
    pub created_at: DateTime<Utc>,
}

// ============ Classification ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// DGII confirmed the identifier is not a registered taxpayer.
    NotRegistered,
    /// Banner other than "not registered" (rate limiting, maintenance).
    UpstreamTransient,
    /// Neither a banner nor any data row.
    EmptyResponse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotRegistered => write!(f, "not_registered"),
            ErrorKind::UpstreamTransient => write!(f, "upstream_transient"),
            ErrorKind::EmptyResponse => write!(f, "empty_response"),
        }
    }
}

/// A negative lookup outcome read from the upstream page. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ============ Metrics ============

/// One row per calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DailyUsageMetrics {
    pub date: NaiveDate,
    pub total_requests: i64,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub errors: i64,
}

/// Outcome flags reported once per terminal lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOutcome {
    pub cache_hit: bool,
    pub error: bool,
}

// ============ API Models ============

/// Query parameters for `GET /api/v1/lookup`.
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    #[serde(alias = "rnc")]
    pub id: String,
}

/// Body for `POST /api/v1/lookup`.
#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    #[serde(alias = "rnc")]
    pub id: String,
}
