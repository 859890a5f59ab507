//! Layer 1: Namespace-qualified names.
//!
//! A `QName` pairs a namespace URI with a local name. The expanded text form
//! is `{uri}local`; names in the default (empty) namespace render as the bare
//! local name.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidName};

/// The default (empty) namespace.
pub const NS_DEFAULT_URI: &str = "";

/// Namespace of JCR-defined item names (`jcr:primaryType`, ...).
pub const NS_JCR_URI: &str = "http://www.jcp.org/jcr/1.0";

/// Namespace of built-in primary node types (`nt:base`, ...).
pub const NS_NT_URI: &str = "http://www.jcp.org/jcr/nt/1.0";

/// Namespace of built-in mixin node types.
pub const NS_MIX_URI: &str = "http://www.jcp.org/jcr/mix/1.0";

/// Namespace reserved for repository-internal names (`rep:root`, ...).
pub const NS_REP_URI: &str = "internal";

/// Namespace-qualified name.
///
/// The local name must be non-empty and free of the structural characters
/// `{`, `}`, and `/`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QName {
    namespace: String,
    local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Result<Self, CoreError> {
        let namespace = namespace.into();
        let local = local.into();
        if local.is_empty() {
            return Err(InvalidName {
                raw: local,
                reason: "empty local name".into(),
            }
            .into());
        }
        if local.contains(['{', '}', '/']) {
            return Err(InvalidName {
                raw: local,
                reason: "local name contains '{', '}' or '/'".into(),
            }
            .into());
        }
        Ok(Self { namespace, local })
    }

    /// Parses the expanded form `{uri}local`; a bare string is taken as a
    /// local name in the default namespace.
    pub fn parse_expanded(s: &str) -> Result<Self, CoreError> {
        if let Some(rest) = s.strip_prefix('{') {
            let Some((namespace, local)) = rest.split_once('}') else {
                return Err(InvalidName {
                    raw: s.to_string(),
                    reason: "missing '}' after namespace".into(),
                }
                .into());
            };
            Self::new(namespace, local)
        } else {
            Self::new(NS_DEFAULT_URI, s)
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    /// Renders the expanded form `{uri}local` (bare local name in the
    /// default namespace).
    pub fn to_expanded(&self) -> String {
        if self.namespace.is_empty() {
            self.local.clone()
        } else {
            format!("{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QName({})", self.to_expanded())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl TryFrom<String> for QName {
    type Error = CoreError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        QName::parse_expanded(&s)
    }
}

impl From<QName> for String {
    fn from(name: QName) -> String {
        name.to_expanded()
    }
}

macro_rules! well_known {
    ($(#[$doc:meta])* $fn_name:ident, $ns:expr, $local:expr) => {
        $(#[$doc])*
        pub fn $fn_name() -> &'static QName {
            static NAME: OnceLock<QName> = OnceLock::new();
            NAME.get_or_init(|| QName {
                namespace: $ns.into(),
                local: $local.into(),
            })
        }
    };
}

well_known!(
    /// `jcr:primaryType` - the mandatory primary-type property of every node.
    jcr_primary_type, NS_JCR_URI, "primaryType");
well_known!(
    /// `jcr:mixinTypes` - the mixin-type property.
    jcr_mixin_types, NS_JCR_URI, "mixinTypes");
well_known!(
    /// `jcr:uuid` - the referenceable-identity property.
    jcr_uuid, NS_JCR_URI, "uuid");
well_known!(
    /// `jcr:versionStorage` - conventional name of the version-storage subtree.
    jcr_version_storage, NS_JCR_URI, "versionStorage");
well_known!(
    /// `rep:root` - the node type of the repository root.
    rep_root, NS_REP_URI, "root");
well_known!(
    /// `rep:system` - the node type of the system subtree.
    rep_system, NS_REP_URI, "system");
well_known!(
    /// `rep:versionStorage` - the node type of the version-storage root.
    rep_version_storage, NS_REP_URI, "versionStorage");
well_known!(
    /// `nt:base` - the base node type; its first property definition is
    /// `jcr:primaryType`.
    nt_base, NS_NT_URI, "base");
well_known!(
    /// `nt:unstructured` - the catch-all node type.
    nt_unstructured, NS_NT_URI, "unstructured");
