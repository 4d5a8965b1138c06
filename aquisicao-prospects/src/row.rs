//! Dataset rows.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One prospect from the dataset.
///
/// Code columns accept either strings or numbers, flag columns accept
/// booleans or `0`/`1`, and `mes_ref` accepts an ISO date optionally followed
/// by a time. Coordinates accept numbers or numeric strings. Unknown columns are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProspectRow {
    #[serde(default, deserialize_with = "code")]
    pub cnpj_cpf: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub cd_cnae5: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub cd_cnae: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub faixa_fat: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub unidade_federal: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub poligono: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub pub_credito: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub porte: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub rating: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub fl_potencial: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    pub fl_cnae_foco: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    pub fl_pep: Option<bool>,
    #[serde(default, deserialize_with = "code")]
    pub status_cadastral: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub segmento: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub campanha: Option<String>,
    #[serde(default, deserialize_with = "code")]
    pub funil: Option<String>,
    #[serde(default, deserialize_with = "month")]
    pub mes_ref: Option<NaiveDate>,
    #[serde(default, deserialize_with = "decimal")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "decimal")]
    pub long: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    use serde::de::Error;
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a code, got {other}"))),
    }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    use serde::de::Error;
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(D::Error::custom(format!("flag must be 0 or 1, got {n}"))),
        },
        Some(Value::String(s)) => match s.trim() {
            "0" | "false" => Ok(Some(false)),
            "1" | "true" => Ok(Some(true)),
            _ => Err(D::Error::custom(format!("flag must be 0 or 1, got {s:?}"))),
        },
        Some(other) => Err(D::Error::custom(format!("expected a flag, got {other}"))),
    }
}

fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    use serde::de::Error;
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a number, got {s:?}"))),
        Some(other) => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}

fn month<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    use serde::de::Error;
    let raw = match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };
    let date_part = raw.trim().get(..10).unwrap_or(raw.trim());
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| D::Error::custom(format!("invalid mes_ref {raw:?}: {e}")))
}
