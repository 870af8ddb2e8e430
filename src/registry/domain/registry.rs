//! Effective-name registry with conflict detection.

use crate::downstream::domain::{DownstreamServerConfig, ToolDescriptor};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// The server and original tool name behind a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolOrigin {
    /// Server name.
    pub server: String,
    /// Tool name as advertised by the server.
    pub original_name: String,
}

impl fmt::Display for ToolOrigin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.server, self.original_name)
    }
}

/// One effective name claimed by more than one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCollision {
    /// The contested effective name.
    pub effective_name: String,
    /// Every origin claiming the name, sorted.
    pub origins: Vec<ToolOrigin>,
}

impl fmt::Display for NameCollision {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origins: Vec<String> = self.origins.iter().map(ToString::to_string).collect();
        write!(
            formatter,
            "'{}' is provided by {}",
            self.effective_name,
            origins.join(", ")
        )
    }
}

/// A rebuild found effective names claimed by distinct origins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "tool name conflict: {}; configure an alias in tool_meta to disambiguate",
    describe(.collisions)
)]
pub struct ToolNameConflict {
    /// Every contested name with its origins.
    pub collisions: Vec<NameCollision>,
}

fn describe(collisions: &[NameCollision]) -> String {
    collisions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One tool exposed through the unified namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    effective_name: String,
    origin: ToolOrigin,
    disabled: bool,
    descriptor: ToolDescriptor,
}

impl RegistryEntry {
    /// Returns the name the tool is exposed under.
    #[must_use]
    pub fn effective_name(&self) -> &str {
        &self.effective_name
    }

    /// Returns the server that owns the tool.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.origin.server
    }

    /// Returns the tool name the server knows.
    #[must_use]
    pub fn original_name(&self) -> &str {
        &self.origin.original_name
    }

    /// Returns the server and original name.
    #[must_use]
    pub const fn origin(&self) -> &ToolOrigin {
        &self.origin
    }

    /// Returns whether the tool is forbidden.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the descriptor as advertised by the server.
    #[must_use]
    pub const fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }
}

/// Immutable map from effective tool names to their origins.
///
/// Forbidden tools stay listed but are marked disabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a registry from each server's configuration and tool listing.
    ///
    /// # Errors
    ///
    /// Returns [`ToolNameConflict`] naming every effective name claimed by
    /// more than one `(server, original name)` pair; nothing is built in
    /// that case.
    pub fn build<'a>(
        listings: impl IntoIterator<Item = (&'a DownstreamServerConfig, &'a [ToolDescriptor])>,
    ) -> Result<Self, ToolNameConflict> {
        let mut entries: BTreeMap<String, RegistryEntry> = BTreeMap::new();
        let mut claims: BTreeMap<String, BTreeSet<ToolOrigin>> = BTreeMap::new();

        for (config, tools) in listings {
            for tool in tools {
                let effective_name = config.effective_name(&tool.name).to_owned();
                let origin = ToolOrigin {
                    server: config.name().to_owned(),
                    original_name: tool.name.clone(),
                };
                claims
                    .entry(effective_name.clone())
                    .or_default()
                    .insert(origin.clone());
                entries.entry(effective_name.clone()).or_insert_with(|| RegistryEntry {
                    disabled: config.is_forbidden(&effective_name, &tool.name),
                    effective_name,
                    origin,
                    descriptor: tool.clone(),
                });
            }
        }

        let collisions: Vec<NameCollision> = claims
            .into_iter()
            .filter(|(_, origins)| origins.len() > 1)
            .map(|(effective_name, origins)| NameCollision {
                effective_name,
                origins: origins.into_iter().collect(),
            })
            .collect();
        if !collisions.is_empty() {
            return Err(ToolNameConflict { collisions });
        }

        Ok(Self { entries })
    }

    /// Returns the entry exposed under `effective_name`.
    #[must_use]
    pub fn resolve(&self, effective_name: &str) -> Option<&RegistryEntry> {
        self.entries.get(effective_name)
    }

    /// Returns whether `name` refers to a forbidden tool.
    ///
    /// An entry exposed under `name` decides on its own. Only when no entry
    /// carries that effective name is `name` matched against the original
    /// names of aliased entries.
    #[must_use]
    pub fn is_forbidden(&self, name: &str) -> bool {
        match self.entries.get(name) {
            Some(entry) => entry.disabled,
            None => self
                .entries
                .values()
                .any(|entry| entry.disabled && entry.original_name() == name),
        }
    }

    /// Returns all entries ordered by effective name.
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::domain::{ToolMeta, TransportConfig};
    use rstest::rstest;

    fn config(name: &str) -> DownstreamServerConfig {
        DownstreamServerConfig::new(name, TransportConfig::stdio("mcp").expect("valid transport"))
            .expect("valid config")
    }

    fn tools(names: &[&str]) -> Vec<ToolDescriptor> {
        names.iter().copied().map(ToolDescriptor::new).collect()
    }

    #[test]
    fn maps_aliases_to_original_names() {
        let files = config("files").with_tool_meta("read", ToolMeta::aliased("files_read"));
        let listing = tools(&["read", "write"]);

        let registry =
            ToolRegistry::build([(&files, listing.as_slice())]).expect("no conflict expected");

        let entry = registry.resolve("files_read").expect("alias should resolve");
        assert_eq!(entry.server(), "files");
        assert_eq!(entry.original_name(), "read");
        assert!(registry.resolve("read").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_names_across_servers_conflict() {
        let first = config("c1");
        let second = config("c2");
        let listing = tools(&["dup", "other"]);
        let dup_only = tools(&["dup"]);

        let conflict = ToolRegistry::build([
            (&first, listing.as_slice()),
            (&second, dup_only.as_slice()),
        ])
        .expect_err("conflict expected");

        assert_eq!(conflict.collisions.len(), 1);
        let collision = conflict.collisions.first().expect("one collision");
        assert_eq!(collision.effective_name, "dup");
        assert_eq!(
            collision.origins,
            vec![
                ToolOrigin {
                    server: "c1".to_owned(),
                    original_name: "dup".to_owned()
                },
                ToolOrigin {
                    server: "c2".to_owned(),
                    original_name: "dup".to_owned()
                },
            ]
        );
        assert!(conflict.to_string().contains("c1/dup, c2/dup"));
    }

    #[test]
    fn alias_colliding_with_sibling_tool_on_same_server_conflicts() {
        let files = config("files").with_tool_meta("read", ToolMeta::aliased("write"));
        let listing = tools(&["read", "write"]);

        let result = ToolRegistry::build([(&files, listing.as_slice())]);

        assert!(result.is_err());
    }

    #[test]
    fn alias_resolves_cross_server_conflict() {
        let first = config("c1");
        let second = config("c2").with_tool_meta("dup", ToolMeta::aliased("c2_dup"));
        let listing = tools(&["dup"]);

        let registry = ToolRegistry::build([
            (&first, listing.as_slice()),
            (&second, listing.as_slice()),
        ])
        .expect("alias should disambiguate");

        assert_eq!(
            registry.resolve("c2_dup").map(RegistryEntry::server),
            Some("c2")
        );
    }

    #[rstest]
    #[case("files_read")]
    #[case("read")]
    fn forbidden_by_alias_or_original_stays_listed(#[case] forbidden: &str) {
        let files = config("files")
            .with_tool_meta("read", ToolMeta::aliased("files_read"))
            .with_forbidden_tools([forbidden.to_owned()]);
        let listing = tools(&["read", "write"]);

        let registry =
            ToolRegistry::build([(&files, listing.as_slice())]).expect("no conflict expected");

        let entry = registry.resolve("files_read").expect("entry should stay listed");
        assert!(entry.is_disabled());
        assert!(registry.is_forbidden("files_read"));
        assert!(registry.is_forbidden("read"));
        assert!(!registry.is_forbidden("write"));
    }

    #[test]
    fn forbidden_original_name_does_not_shadow_another_servers_tool() {
        let alpha = config("alpha")
            .with_tool_meta("read", ToolMeta::aliased("alpha_read"))
            .with_forbidden_tools(["read".to_owned()]);
        let beta = config("beta");
        let listing = tools(&["read"]);

        let registry = ToolRegistry::build([
            (&alpha, listing.as_slice()),
            (&beta, listing.as_slice()),
        ])
        .expect("alias keeps the names apart");

        assert!(registry.is_forbidden("alpha_read"));
        assert!(!registry.is_forbidden("read"));
        assert_eq!(registry.resolve("read").map(RegistryEntry::server), Some("beta"));
    }
}
