//! Addressing Resolver
//!
//! Parses a request's target address across the three addressing scopes
//! (absolute `//sp/peer/path`, peer-relative `/peer/path`, local-relative
//! `path`) and detects virtual-resource suffixes (`la`, `ol`, `fopt`, `rpt`).
//!
//! All matching is segment-aware: a path segment that merely starts with a
//! reserved token (e.g. a sibling named `later`) never matches.

use serde::Deserialize;
use tracing::debug;

use crate::domain::{Directory, ResourceId, StructuredPath};
use crate::error::Result;
use crate::primitive::ResourceType;

// =============================================================================
// Node Identity
// =============================================================================

/// Identity of the local node within the federation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CseIdentity {
    /// Service-provider id, with its leading `//` (e.g. `//mesh.example`)
    pub sp_id: String,
    /// Node id, with its leading `/` (e.g. `/peerY`)
    pub cse_id: String,
    /// Resource name of the base (root) resource
    pub base_rn: String,
}

impl CseIdentity {
    pub fn new(sp_id: impl Into<String>, cse_id: impl Into<String>, base_rn: impl Into<String>) -> Self {
        Self {
            sp_id: sp_id.into(),
            cse_id: cse_id.into(),
            base_rn: base_rn.into(),
        }
    }

    /// The service provider segment without its `//` prefix.
    fn sp_segment(&self) -> &str {
        self.sp_id.trim_start_matches('/')
    }

    /// The node id segment without its `/` prefix.
    fn cse_segment(&self) -> &str {
        self.cse_id.trim_start_matches('/')
    }
}

// =============================================================================
// Target Resolution
// =============================================================================

/// Addressing scope of a target, as written by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScope {
    Absolute,
    PeerRelative,
    LocalRelative,
}

impl TargetScope {
    pub fn of(target: &str) -> TargetScope {
        if target.starts_with("//") {
            TargetScope::Absolute
        } else if target.starts_with('/') {
            TargetScope::PeerRelative
        } else {
            TargetScope::LocalRelative
        }
    }
}

/// Result of resolving a target address against the local identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    /// For local targets: the node-relative path. For remote targets: the
    /// longest suffix with any recognized service-provider segment stripped
    /// (a peer id plus residual path).
    pub path: String,
    pub is_local: bool,
}

/// Resolve a target address to (node-relative path, locality).
///
/// Absolute and peer-relative addresses whose peer segment names this node
/// are rewritten to local-relative form; anything else is left for the
/// forwarder. The wildcard first segment `-` aliases the base resource name.
/// Resolution is idempotent: an already-local path resolves to itself.
pub fn resolve_target(target: &str, identity: &CseIdentity) -> ResolvedTarget {
    let (path, is_local) = match TargetScope::of(target) {
        TargetScope::Absolute => {
            let mut segments = target.trim_start_matches('/').splitn(3, '/');
            let sp = segments.next().unwrap_or("");
            let peer = segments.next().unwrap_or("");
            let rest = segments.next().unwrap_or("");

            if sp == identity.sp_segment() && peer == identity.cse_segment() {
                (rest.to_string(), true)
            } else if sp == identity.sp_segment() {
                // Same provider domain: strip the provider segment so the
                // forwarder sees a peer id plus residual path
                if rest.is_empty() {
                    (format!("/{}", peer), false)
                } else {
                    (format!("/{}/{}", peer, rest), false)
                }
            } else {
                (target.to_string(), false)
            }
        }
        TargetScope::PeerRelative => {
            let mut segments = target.trim_start_matches('/').splitn(2, '/');
            let peer = segments.next().unwrap_or("");
            let rest = segments.next().unwrap_or("");

            if peer == identity.cse_segment() {
                (rest.to_string(), true)
            } else {
                (target.to_string(), false)
            }
        }
        TargetScope::LocalRelative => (target.to_string(), true),
    };

    // Wildcard for the base resource name; a bare node address means the base
    let path = if is_local {
        if path.is_empty() {
            identity.base_rn.clone()
        } else {
            expand_wildcard(&path, &identity.base_rn)
        }
    } else {
        path
    };

    ResolvedTarget { path, is_local }
}

fn expand_wildcard(path: &str, base_rn: &str) -> String {
    match path.split_once('/') {
        Some(("-", rest)) => format!("{}/{}", base_rn, rest),
        None if path == "-" => base_rn.to_string(),
        _ => path.to_string(),
    }
}

// =============================================================================
// Virtual Resources
// =============================================================================

/// Virtual-resource kinds: computed views addressed as a child suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKind {
    /// Newest member of an ordered child list (`la`)
    Latest,
    /// Oldest member of an ordered child list (`ol`)
    Oldest,
    /// Group fan-out point (`fopt`)
    FanOut,
    /// Dataset retrieval point (`rpt`)
    RetrievalPoint,
}

impl VirtualKind {
    pub fn token(&self) -> &'static str {
        match self {
            VirtualKind::Latest => "la",
            VirtualKind::Oldest => "ol",
            VirtualKind::FanOut => "fopt",
            VirtualKind::RetrievalPoint => "rpt",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "la" => Some(VirtualKind::Latest),
            "ol" => Some(VirtualKind::Oldest),
            "fopt" => Some(VirtualKind::FanOut),
            "rpt" => Some(VirtualKind::RetrievalPoint),
            _ => None,
        }
    }

    /// Whether a parent of the given kind can bear this virtual child.
    pub fn compatible_with(&self, parent: ResourceType) -> bool {
        match self {
            VirtualKind::Latest | VirtualKind::Oldest => parent.has_ordered_children(),
            VirtualKind::FanOut => parent == ResourceType::Group,
            VirtualKind::RetrievalPoint => parent == ResourceType::Dataset,
        }
    }
}

impl std::fmt::Display for VirtualKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// A local path recognized as addressing a virtual resource.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTarget {
    pub kind: VirtualKind,
    pub parent_ri: ResourceId,
    pub parent_ty: ResourceType,
    /// Path remainder after the virtual token (appended to fan-out members)
    pub remainder: Option<String>,
}

/// Detect whether a local-relative path addresses a virtual resource.
///
/// The path is tokenized into segments and the first segment that is a
/// reserved token splits it into parent path and remainder. The parent is
/// resolved through the directory (by structured path or identifier); a
/// missing parent or a type incompatible with the virtual kind means the
/// address does not denote a virtual resource and falls through to normal
/// resolution.
pub async fn detect_virtual(
    path: &str,
    directory: &dyn Directory,
) -> Result<Option<VirtualTarget>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let Some((idx, kind)) = segments
        .iter()
        .enumerate()
        .find_map(|(i, seg)| VirtualKind::from_token(seg).map(|k| (i, k)))
    else {
        return Ok(None);
    };

    // A token in first position has no parent to serve the view
    if idx == 0 {
        return Ok(None);
    }

    let parent_path = segments[..idx].join("/");
    let remainder = if idx + 1 < segments.len() {
        Some(segments[idx + 1..].join("/"))
    } else {
        None
    };

    let parent = resolve_entry_by_address(&parent_path, directory).await?;
    let Some(parent) = parent else {
        debug!(parent = %parent_path, token = %kind, "virtual token without resolvable parent");
        return Ok(None);
    };

    if !kind.compatible_with(parent.ty) {
        debug!(parent_ty = %parent.ty, token = %kind, "virtual token under incompatible parent");
        return Ok(None);
    }

    Ok(Some(VirtualTarget {
        kind,
        parent_ri: parent.ri,
        parent_ty: parent.ty,
        remainder,
    }))
}

/// Resolve a node-relative address that may be a structured path or a bare
/// resource identifier.
pub async fn resolve_entry_by_address(
    address: &str,
    directory: &dyn Directory,
) -> Result<Option<crate::domain::DirectoryEntry>> {
    if address.contains('/') {
        directory
            .resolve_by_path(&StructuredPath::new(address))
            .await
    } else {
        // Single segment: an identifier, or the base resource's own path
        if let Some(entry) = directory.resolve_by_id(&ResourceId::new(address)).await? {
            return Ok(Some(entry));
        }
        directory
            .resolve_by_path(&StructuredPath::new(address))
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CseIdentity {
        CseIdentity::new("//providerX", "/peerY", "base")
    }

    #[test]
    fn test_absolute_for_me() {
        let resolved = resolve_target("//providerX/peerY/base/ae1", &identity());
        assert_eq!(resolved.path, "base/ae1");
        assert!(resolved.is_local);
    }

    #[test]
    fn test_absolute_same_provider_other_peer() {
        let resolved = resolve_target("//providerX/peerZ/base/ae1", &identity());
        assert_eq!(resolved.path, "/peerZ/base/ae1");
        assert!(!resolved.is_local);
    }

    #[test]
    fn test_absolute_foreign_provider() {
        let resolved = resolve_target("//providerQ/peerZ/base/ae1", &identity());
        assert_eq!(resolved.path, "//providerQ/peerZ/base/ae1");
        assert!(!resolved.is_local);
    }

    #[test]
    fn test_peer_relative_for_me() {
        let resolved = resolve_target("/peerY/base/cnt1", &identity());
        assert_eq!(resolved.path, "base/cnt1");
        assert!(resolved.is_local);
    }

    #[test]
    fn test_peer_relative_other() {
        let resolved = resolve_target("/peerZ/base/cnt1", &identity());
        assert_eq!(resolved.path, "/peerZ/base/cnt1");
        assert!(!resolved.is_local);
    }

    #[test]
    fn test_local_relative_is_idempotent() {
        let resolved = resolve_target("base/cnt1/la", &identity());
        assert_eq!(resolved.path, "base/cnt1/la");
        assert!(resolved.is_local);

        let again = resolve_target(&resolved.path, &identity());
        assert_eq!(again.path, resolved.path);
        assert!(again.is_local);
    }

    #[test]
    fn test_peer_prefix_must_match_whole_segment() {
        // "/peerYY/..." must not be mistaken for the local node "/peerY"
        let resolved = resolve_target("/peerYY/base/cnt1", &identity());
        assert!(!resolved.is_local);
        assert_eq!(resolved.path, "/peerYY/base/cnt1");
    }

    #[test]
    fn test_bare_node_address_means_the_base() {
        let resolved = resolve_target("//providerX/peerY", &identity());
        assert_eq!(resolved.path, "base");
        assert!(resolved.is_local);

        let resolved = resolve_target("/peerY", &identity());
        assert_eq!(resolved.path, "base");
        assert!(resolved.is_local);
    }

    #[test]
    fn test_wildcard_expands_to_base() {
        let resolved = resolve_target("-/cnt1", &identity());
        assert_eq!(resolved.path, "base/cnt1");
        assert!(resolved.is_local);

        let bare = resolve_target("-", &identity());
        assert_eq!(bare.path, "base");
    }

    #[test]
    fn test_wildcard_only_in_first_segment() {
        let resolved = resolve_target("base/-/cnt1", &identity());
        assert_eq!(resolved.path, "base/-/cnt1");
    }

    #[test]
    fn test_virtual_kind_compatibility() {
        assert!(VirtualKind::Latest.compatible_with(ResourceType::Container));
        assert!(VirtualKind::Oldest.compatible_with(ResourceType::Dataset));
        assert!(!VirtualKind::Latest.compatible_with(ResourceType::Group));
        assert!(VirtualKind::FanOut.compatible_with(ResourceType::Group));
        assert!(!VirtualKind::FanOut.compatible_with(ResourceType::Container));
        assert!(VirtualKind::RetrievalPoint.compatible_with(ResourceType::Dataset));
        assert!(!VirtualKind::RetrievalPoint.compatible_with(ResourceType::Container));
    }

    #[test]
    fn test_token_must_be_exact_segment() {
        // Segment-level tokenization: "later" starts with "la" but is no token
        let segments: Vec<&str> = "base/cnt1/later".split('/').collect();
        assert!(segments
            .iter()
            .all(|s| VirtualKind::from_token(s).is_none()));
    }

    #[test]
    fn test_token_round_trip() {
        use assert_matches::assert_matches;

        assert_matches!(VirtualKind::from_token("la"), Some(VirtualKind::Latest));
        assert_matches!(VirtualKind::from_token("ol"), Some(VirtualKind::Oldest));
        assert_matches!(VirtualKind::from_token("fopt"), Some(VirtualKind::FanOut));
        assert_matches!(
            VirtualKind::from_token("rpt"),
            Some(VirtualKind::RetrievalPoint)
        );
        assert_matches!(VirtualKind::from_token("latest"), None);
    }
}
