//! # Command Registry
//!
//! Commands and key bindings live in three layers. Lookups walk a short
//! chain and the first layer that knows the answer wins:
//!
//! ```text
//! instance (this sheet) ──▶ sheet type ──▶ global
//! ```
//!
//! Bindings map `(mode, key)` to a command *name*; the name is then looked up
//! through the same chain, so a global key picks up a per-sheet override of
//! the command it names.

use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::command::Command;
use crate::core::dispatch::DispatchError;
use crate::sheet::{Sheet, SheetId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Normal,
    /// A modal sub-mode defined by a consumer, e.g. `edit` for a prompt line.
    Custom(String),
}

impl InputMode {
    pub fn custom(name: &str) -> Self {
        InputMode::Custom(name.to_string())
    }

    pub fn label(&self) -> &str {
        match self {
            InputMode::Normal => "normal",
            InputMode::Custom(name) => name,
        }
    }
}

/// A key name as produced by the adapter (`"j"`, `"Ctrl+R"`, `"Enter"`).
/// Chords are space separated: `"g j"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyToken(String);

impl KeyToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extends a pending prefix with the next key.
    pub fn then(&self, next: &KeyToken) -> KeyToken {
        KeyToken(format!("{} {}", self.0, next.0))
    }
}

impl From<&str> for KeyToken {
    fn from(s: &str) -> Self {
        KeyToken::new(s)
    }
}

impl fmt::Display for KeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    SheetType(String),
    Instance(SheetId),
}

struct Layer<S: Sheet> {
    commands: HashMap<String, Command<S>>,
    bindings: HashMap<(InputMode, KeyToken), String>,
}

impl<S: Sheet> Default for Layer<S> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
            bindings: HashMap::new(),
        }
    }
}

struct Layers<S: Sheet> {
    global: Layer<S>,
    types: HashMap<String, Layer<S>>,
    instances: HashMap<SheetId, Layer<S>>,
}

impl<S: Sheet> Layers<S> {
    fn layer_mut(&mut self, scope: Scope) -> &mut Layer<S> {
        match scope {
            Scope::Global => &mut self.global,
            Scope::SheetType(t) => self.types.entry(t).or_default(),
            Scope::Instance(id) => self.instances.entry(id).or_default(),
        }
    }

    /// Most specific first.
    fn chain<'a>(&'a self, sheet_type: &str, instance: SheetId) -> impl Iterator<Item = &'a Layer<S>> {
        self.instances
            .get(&instance)
            .into_iter()
            .chain(self.types.get(sheet_type))
            .chain(iter::once(&self.global))
    }
}

pub struct CommandRegistry<S: Sheet> {
    layers: RwLock<Layers<S>>,
}

impl<S: Sheet> Default for CommandRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Sheet> CommandRegistry<S> {
    pub fn new() -> Self {
        Self {
            layers: RwLock::new(Layers {
                global: Layer::default(),
                types: HashMap::new(),
                instances: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Layers<S>> {
        self.layers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Layers<S>> {
        self.layers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a command in a scope, replacing any command of the same
    /// name in that scope.
    pub fn register(&self, scope: Scope, command: Command<S>) {
        let mut layers = self.write();
        let layer = layers.layer_mut(scope.clone());
        if layer.commands.contains_key(&command.name) {
            debug!("Overriding command '{}' in {:?}", command.name, scope);
        }
        layer.commands.insert(command.name.clone(), command);
    }

    pub fn bind(&self, scope: Scope, mode: InputMode, token: impl Into<KeyToken>, command: &str) {
        let mut layers = self.write();
        layers
            .layer_mut(scope)
            .bindings
            .insert((mode, token.into()), command.to_string());
    }

    /// Looks a command up by name through the override chain.
    pub fn command(&self, name: &str, sheet_type: &str, instance: SheetId) -> Option<Command<S>> {
        let layers = self.read();
        layers
            .chain(sheet_type, instance)
            .find_map(|layer| layer.commands.get(name))
            .cloned()
    }

    /// Resolves a key in a mode to a concrete command for one sheet.
    pub fn resolve(
        &self,
        token: &KeyToken,
        mode: &InputMode,
        sheet_type: &str,
        instance: SheetId,
    ) -> Result<Command<S>, DispatchError> {
        let layers = self.read();
        let key = (mode.clone(), token.clone());
        let name = layers
            .chain(sheet_type, instance)
            .find_map(|layer| layer.bindings.get(&key))
            .ok_or_else(|| DispatchError::NotFound {
                token: token.clone(),
                mode: mode.clone(),
            })?;
        layers
            .chain(sheet_type, instance)
            .find_map(|layer| layer.commands.get(name))
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCommand(name.clone()))
    }

    /// True when `partial` starts a longer chord bound in this mode.
    pub fn is_prefix(&self, partial: &KeyToken, mode: &InputMode, sheet_type: &str, instance: SheetId) -> bool {
        let layers = self.read();
        let prefix = format!("{} ", partial.as_str());
        layers.chain(sheet_type, instance).any(|layer| {
            layer
                .bindings
                .keys()
                .any(|(m, t)| m == mode && t.as_str().starts_with(&prefix))
        })
    }

    /// Effective bindings for a sheet in a mode, sorted by key.
    pub fn bindings_for(&self, mode: &InputMode, sheet_type: &str, instance: SheetId) -> Vec<(KeyToken, String)> {
        let layers = self.read();
        let mut seen: HashMap<KeyToken, String> = HashMap::new();
        for layer in layers.chain(sheet_type, instance) {
            for ((m, token), name) in &layer.bindings {
                if m == mode && !seen.contains_key(token) {
                    seen.insert(token.clone(), name.clone());
                }
            }
        }
        let mut out: Vec<(KeyToken, String)> = seen.into_iter().collect();
        out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        out
    }

    /// Drops the instance layer of a closed sheet.
    pub fn forget_instance(&self, instance: SheetId) {
        self.write().instances.remove(&instance);
    }
}
