use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::KernelError;
use crate::template::TemplateId;

/// Deepest composite nesting the codec writes or reads.
pub const MAX_NAME_DEPTH: usize = 32;
const HEADER_LEN: usize = 5;

/// Opaque, type-tagged resource name.
///
/// Names are chosen by application handlers and must survive a trip through
/// the surrogate key codec unchanged, so the set of kinds is closed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Name {
    Text(String),
    Integer(i64),
    Uri(Url),
    Bytes(Vec<u8>),
    /// Hierarchical name made of local segments, outermost first.
    Composite(Vec<Name>),
}

/// Type tag recorded next to an encoded name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameKind {
    Text,
    Integer,
    Uri,
    Bytes,
    Composite,
}

impl NameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NameKind::Text => "text",
            NameKind::Integer => "integer",
            NameKind::Uri => "uri",
            NameKind::Bytes => "bytes",
            NameKind::Composite => "composite",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(NameKind::Text),
            "integer" => Some(NameKind::Integer),
            "uri" => Some(NameKind::Uri),
            "bytes" => Some(NameKind::Bytes),
            "composite" => Some(NameKind::Composite),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            NameKind::Text => 1,
            NameKind::Integer => 2,
            NameKind::Uri => 3,
            NameKind::Bytes => 4,
            NameKind::Composite => 5,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(NameKind::Text),
            2 => Some(NameKind::Integer),
            3 => Some(NameKind::Uri),
            4 => Some(NameKind::Bytes),
            5 => Some(NameKind::Composite),
            _ => None,
        }
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Name {
    pub fn text(value: impl Into<String>) -> Self {
        Name::Text(value.into())
    }

    pub fn kind(&self) -> NameKind {
        match self {
            Name::Text(_) => NameKind::Text,
            Name::Integer(_) => NameKind::Integer,
            Name::Uri(_) => NameKind::Uri,
            Name::Bytes(_) => NameKind::Bytes,
            Name::Composite(_) => NameKind::Composite,
        }
    }

    /// Serializes the name as `kind | u32 length | payload`, recursively for
    /// composite names.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KernelError> {
        let mut out = Vec::new();
        self.write_into(&mut out, 0)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        let (name, consumed) = read_name(bytes, 0)?;
        if consumed != bytes.len() {
            return Err(KernelError::Key(format!(
                "{} trailing bytes after encoded name",
                bytes.len() - consumed
            )));
        }
        Ok(name)
    }

    fn write_into(&self, out: &mut Vec<u8>, depth: usize) -> Result<(), KernelError> {
        if depth > MAX_NAME_DEPTH {
            return Err(KernelError::Key("composite name nests too deeply".into()));
        }
        out.push(self.kind().code());
        let len_at = out.len();
        out.extend_from_slice(&[0; 4]);
        match self {
            Name::Text(value) => out.extend_from_slice(value.as_bytes()),
            Name::Integer(value) => out.extend_from_slice(&value.to_be_bytes()),
            Name::Uri(value) => out.extend_from_slice(value.as_str().as_bytes()),
            Name::Bytes(value) => out.extend_from_slice(value),
            Name::Composite(parts) => {
                for part in parts {
                    part.write_into(out, depth + 1)?;
                }
            }
        }
        let payload = out.len() - len_at - 4;
        let len = u32::try_from(payload)
            .map_err(|_| KernelError::Key(format!("name payload of {payload} bytes is too large")))?;
        out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }
}

fn read_name(bytes: &[u8], depth: usize) -> Result<(Name, usize), KernelError> {
    if depth > MAX_NAME_DEPTH {
        return Err(KernelError::Key("composite name nests too deeply".into()));
    }
    if bytes.len() < HEADER_LEN {
        return Err(KernelError::Key("truncated name header".into()));
    }
    let kind = NameKind::from_code(bytes[0])
        .ok_or_else(|| KernelError::Key(format!("unknown name kind code {}", bytes[0])))?;
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let end = HEADER_LEN
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| KernelError::Key("truncated name payload".into()))?;
    let payload = &bytes[HEADER_LEN..end];

    let name = match kind {
        NameKind::Text => Name::Text(utf8(payload)?.to_string()),
        NameKind::Integer => {
            let raw: [u8; 8] = payload
                .try_into()
                .map_err(|_| KernelError::Key(format!("integer name has {len} bytes")))?;
            Name::Integer(i64::from_be_bytes(raw))
        }
        NameKind::Uri => {
            let raw = utf8(payload)?;
            let url = Url::parse(raw)
                .map_err(|err| KernelError::Key(format!("invalid uri name {raw}: {err}")))?;
            Name::Uri(url)
        }
        NameKind::Bytes => Name::Bytes(payload.to_vec()),
        NameKind::Composite => {
            let mut parts = Vec::new();
            let mut offset = 0;
            while offset < payload.len() {
                let (part, consumed) = read_name(&payload[offset..], depth + 1)?;
                parts.push(part);
                offset += consumed;
            }
            Name::Composite(parts)
        }
    };
    Ok((name, end))
}

fn utf8(payload: &[u8]) -> Result<&str, KernelError> {
    std::str::from_utf8(payload)
        .map_err(|err| KernelError::Key(format!("name payload is not utf-8: {err}")))
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Text(value) => f.write_str(value),
            Name::Integer(value) => write!(f, "{value}"),
            Name::Uri(value) => f.write_str(value.as_str()),
            Name::Bytes(value) => f.write_str(&hex::encode(value)),
            Name::Composite(parts) => {
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        f.write_str("/")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::Text(value.to_string())
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::Text(value)
    }
}

impl From<i64> for Name {
    fn from(value: i64) -> Self {
        Name::Integer(value)
    }
}

impl From<Url> for Name {
    fn from(value: Url) -> Self {
        Name::Uri(value)
    }
}

/// Logical identity of a resource: an opaque name scoped by its template.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub name: Name,
    pub template_id: TemplateId,
}

impl ResourceId {
    pub fn new(name: impl Into<Name>, template_id: impl Into<TemplateId>) -> Self {
        Self {
            name: name.into(),
            template_id: template_id.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.template_id, self.name)
    }
}

/// Storage-portable form of a [`ResourceId`].
///
/// Keys read back from storage decode lazily: the three stored fields are
/// kept verbatim and the identity is materialized on first access. Equality,
/// ordering and hashing only look at the stored fields, never at the decoded
/// identity.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "KeyParts", into = "KeyParts")]
pub struct ResourceKey {
    template_id: String,
    name_type: String,
    name_value: String,
    decoded: OnceLock<ResourceId>,
}

#[derive(Clone, Serialize, Deserialize)]
struct KeyParts {
    template_id: String,
    name_type: String,
    name_value: String,
}

impl From<KeyParts> for ResourceKey {
    fn from(parts: KeyParts) -> Self {
        ResourceKey::from_parts(parts.template_id, parts.name_type, parts.name_value)
    }
}

impl From<ResourceKey> for KeyParts {
    fn from(key: ResourceKey) -> Self {
        KeyParts {
            template_id: key.template_id,
            name_type: key.name_type,
            name_value: key.name_value,
        }
    }
}

impl ResourceKey {
    /// The distinguished absent key.
    pub fn null() -> Self {
        Self::from_parts(String::new(), String::new(), String::new())
    }

    pub fn is_null(&self) -> bool {
        self.template_id.is_empty() && self.name_type.is_empty() && self.name_value.is_empty()
    }

    /// Builds a key from fields as read from storage without decoding them.
    pub fn from_parts(
        template_id: impl Into<String>,
        name_type: impl Into<String>,
        name_value: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            name_type: name_type.into(),
            name_value: name_value.into(),
            decoded: OnceLock::new(),
        }
    }

    /// Fails on exactly the identities a stored key could not be decoded
    /// back into: an empty template id or a name nested too deeply.
    pub fn encode(id: &ResourceId) -> Result<Self, KernelError> {
        if id.template_id.as_str().is_empty() {
            return Err(KernelError::Key("key has no template id".into()));
        }
        let bytes = id.name.to_bytes()?;
        let key = Self {
            template_id: id.template_id.as_str().to_string(),
            name_type: id.name.kind().as_str().to_string(),
            name_value: URL_SAFE_NO_PAD.encode(bytes),
            decoded: OnceLock::new(),
        };
        let _ = key.decoded.set(id.clone());
        Ok(key)
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// Type tag as stored. This is the tag equality and hashing look at.
    pub fn name_type(&self) -> &str {
        &self.name_type
    }

    /// Type tag of the decoded name once the key has been decoded, the
    /// stored tag before that. A healed tag does not change equality; use
    /// [`healed`](Self::healed) to get a key whose stored tag is corrected.
    pub fn effective_name_type(&self) -> &str {
        match self.decoded.get() {
            Some(id) => id.name.kind().as_str(),
            None => &self.name_type,
        }
    }

    pub fn name_value(&self) -> &str {
        &self.name_value
    }

    /// Materializes the identity behind this key, caching the result.
    ///
    /// Returns `Ok(None)` for the null key.
    pub fn resource_id(&self) -> Result<Option<&ResourceId>, KernelError> {
        if self.is_null() {
            return Ok(None);
        }
        if let Some(id) = self.decoded.get() {
            return Ok(Some(id));
        }
        let id = self.materialize()?;
        Ok(Some(self.decoded.get_or_init(|| id)))
    }

    /// Decodes the key into an owned identity.
    pub fn decode(&self) -> Result<Option<ResourceId>, KernelError> {
        Ok(self.resource_id()?.cloned())
    }

    /// Returns a copy whose stored type tag agrees with the decoded name.
    pub fn healed(&self) -> Result<Self, KernelError> {
        let Some(id) = self.resource_id()? else {
            return Ok(Self::null());
        };
        let healed = Self {
            template_id: self.template_id.clone(),
            name_type: id.name.kind().as_str().to_string(),
            name_value: self.name_value.clone(),
            decoded: OnceLock::new(),
        };
        let _ = healed.decoded.set(id.clone());
        Ok(healed)
    }

    fn materialize(&self) -> Result<ResourceId, KernelError> {
        if self.template_id.is_empty() {
            return Err(KernelError::Key("key has no template id".into()));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(self.name_value.as_bytes())
            .map_err(|err| KernelError::Key(format!("invalid name encoding: {err}")))?;
        let name = Name::from_bytes(&bytes)?;
        if name.kind().as_str() != self.name_type {
            tracing::debug!(
                template = %self.template_id,
                stored = %self.name_type,
                actual = %name.kind(),
                "healing stale name type tag"
            );
        }
        Ok(ResourceId {
            name,
            template_id: TemplateId::new(self.template_id.clone()),
        })
    }

    fn parts(&self) -> (&str, &str, &str) {
        (&self.template_id, &self.name_type, &self.name_value)
    }
}

impl Default for ResourceKey {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.parts() == other.parts()
    }
}

impl Eq for ResourceKey {}

impl PartialOrd for ResourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts().cmp(&other.parts())
    }
}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts().hash(state);
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("ResourceKey(null)");
        }
        f.debug_struct("ResourceKey")
            .field("template_id", &self.template_id)
            .field("name_type", &self.name_type)
            .field("name_value", &self.name_value)
            .field("decoded", &self.decoded.get().is_some())
            .finish()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("null");
        }
        write!(f, "{}/{}/{}", self.template_id, self.name_type, self.name_value)
    }
}
