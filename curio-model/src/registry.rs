use crate::error::{ConfigError, ConfigResult};
use crate::handler::{ArchiveHook, SnapshotArchive};
use crate::schema::EntityType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

struct Registration {
    schema: EntityType,
    hook: Arc<dyn ArchiveHook>,
}

/// The set of mergeable entity types, built once at startup.
///
/// There is no way to mutate a registry after [`EntityRegistryBuilder::build`];
/// callers share it behind an `Arc`.
pub struct EntityRegistry {
    types: BTreeMap<String, Registration>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    /// Loads registrations from a JSON array of entity types.
    ///
    /// Strategies inside may use any raw form `normalize` accepts, e.g.
    /// `"strategy": "PREFER_NON_NULL"` or `{"strategy": "whitelist", "allowed": [...]}`.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let types: Vec<EntityType> = serde_json::from_str(json)?;
        let mut builder = Self::builder();
        for entity_type in types {
            builder.register(entity_type)?;
        }
        Ok(builder.build())
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityType> {
        self.types.get(entity_type).map(|r| &r.schema)
    }

    pub fn archive_hook(&self, entity_type: &str) -> Option<&dyn ArchiveHook> {
        self.types.get(entity_type).map(|r| r.hook.as_ref())
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collects registrations; validation happens as each one is added.
#[derive(Default)]
pub struct EntityRegistryBuilder {
    types: BTreeMap<String, Registration>,
}

impl EntityRegistryBuilder {
    /// Registers a type that archives its full row before deletion.
    pub fn register(&mut self, schema: EntityType) -> ConfigResult<&mut Self> {
        self.register_with_hook(schema, Arc::new(SnapshotArchive))
    }

    /// Registers a type with its own archive hook.
    pub fn register_with_hook(
        &mut self,
        schema: EntityType,
        hook: Arc<dyn ArchiveHook>,
    ) -> ConfigResult<&mut Self> {
        schema.validate()?;
        if self.types.contains_key(&schema.entity_type) {
            return Err(ConfigError::DuplicateEntityType(schema.entity_type));
        }
        self.types
            .insert(schema.entity_type.clone(), Registration { schema, hook });
        Ok(self)
    }

    pub fn build(self) -> EntityRegistry {
        EntityRegistry { types: self.types }
    }
}
