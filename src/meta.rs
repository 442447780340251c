//! Compilation metadata: what a renderer needs besides the compiled tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DeviceRange;
use crate::definition::{ComponentDefinition, DefinitionKind, SerializedComponentDefinition};
use crate::registry::CompilationContext;

/// Definitions used by a compiled tree, bucketed by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedDefinitions {
    pub components: Vec<SerializedComponentDefinition>,
    pub actions: Vec<SerializedComponentDefinition>,
    pub links: Vec<SerializedComponentDefinition>,
    pub text_modifiers: Vec<SerializedComponentDefinition>,
}

impl SerializedDefinitions {
    fn bucket_mut(&mut self, kind: DefinitionKind) -> &mut Vec<SerializedComponentDefinition> {
        match kind {
            DefinitionKind::Component => &mut self.components,
            DefinitionKind::Action => &mut self.actions,
            DefinitionKind::Link => &mut self.links,
            DefinitionKind::TextModifier => &mut self.text_modifiers,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SerializedComponentDefinition> {
        self.components
            .iter()
            .chain(&self.actions)
            .chain(&self.links)
            .chain(&self.text_modifiers)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.iter().any(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaVars {
    pub devices: Vec<DeviceRange>,
    pub locale: String,
    pub definitions: SerializedDefinitions,
    /// Caller-supplied context params other than the locale.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationMetadata {
    pub vars: MetaVars,
}

impl CompilationMetadata {
    pub fn new(ctx: &CompilationContext) -> Self {
        Self {
            vars: MetaVars {
                devices: ctx.devices.as_slice().to_vec(),
                locale: ctx.locale().to_string(),
                definitions: SerializedDefinitions::default(),
                extra: ctx.params.extra.clone(),
            },
        }
    }

    /// Adds a definition once; later records of the same id are ignored.
    pub fn record(&mut self, definition: &ComponentDefinition) {
        if self.contains(&definition.id) {
            return;
        }
        self.vars
            .definitions
            .bucket_mut(definition.kind())
            .push(SerializedComponentDefinition::from(definition));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vars.definitions.contains(id)
    }

    /// Union of both definition sets. Devices and locale stay as they are.
    pub fn merge(&mut self, other: &CompilationMetadata) {
        let definitions = &other.vars.definitions;
        for (kind, bucket) in [
            (DefinitionKind::Component, &definitions.components),
            (DefinitionKind::Action, &definitions.actions),
            (DefinitionKind::Link, &definitions.links),
            (DefinitionKind::TextModifier, &definitions.text_modifiers),
        ] {
            for definition in bucket {
                if !self.contains(&definition.id) {
                    self.vars.definitions.bucket_mut(kind).push(definition.clone());
                }
            }
        }
    }
}
