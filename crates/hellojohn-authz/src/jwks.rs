use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
}

/// Public Ed25519 key in OKP JWK form.
///
/// Field order is fixed by the struct so serialized output is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub use_field: KeyUse,
    pub x: String,
}

impl Jwk {
    pub fn ed25519(kid: impl Into<String>, x: impl Into<String>) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            kid: kid.into(),
            alg: "EdDSA".to_string(),
            use_field: KeyUse::Sig,
            x: x.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Sort by `kid` so every node renders the same bytes for the same set.
    pub fn normalized(mut self) -> Self {
        self.keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        self.keys.dedup_by(|a, b| a.kid == b.kid);
        self
    }

    pub fn merge(sets: impl IntoIterator<Item = Jwks>) -> Self {
        let keys = sets.into_iter().flat_map(|set| set.keys).collect();
        Self { keys }.normalized()
    }
}
