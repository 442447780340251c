//! # No-Code Component Compiler
//!
//! Turns a persisted tree of no-code component entries into a render-ready
//! compiled tree, per locale and across every configured device.
//!
//! ## Compilation Invariants
//!
//! 1. **Device Order**: devices are ordered largest first exactly as configured.
//!    A responsive value cascades from a device toward the largest one and
//!    never upwards. `null` entries count as absent.
//!
//! 2. **Token Shape**: token-valued props are always `{ value, tokenId? }`,
//!    possibly per device. An unknown `tokenId` compiles to the inline
//!    `value` (or `null`) and records `NC002`.
//!
//! 3. **Stable Ids**: normalization assigns every entry an `_id` derived from
//!    its structural position, so repeated passes over the same raw tree
//!    agree on ids. Duplicates are regenerated (`NC007`).
//!
//! 4. **Bottom-Up**: children are compiled before their parent's `auto`,
//!    `styles` and `editing` functions run. Siblings never see each other.
//!
//! 5. **Contained Failures**: a definition function that errors or panics
//!    contributes nothing (`NC005`); an unknown or malformed entry compiles to
//!    a disabled `$MissingComponent` node. Only invalid input, invalid
//!    config, fetch failures and divergence abort a call.
//!
//! 6. **Caching**: compiled subtrees are cached per entry id, locale, device
//!    set and editing mode, and are reused only while the external data they
//!    read is unchanged. Callers remove the ancestor chain of an edited entry
//!    before recompiling.
//!
//! 7. **Fixed Point**: `build_entry` fetches at most once per pass and stops
//!    when a pass requests nothing new, or fails after the configured number
//!    of fetch iterations.

pub mod backend;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod definition;
pub mod discovery;
pub mod editing;
pub mod error;
pub mod externals;
pub mod invoke;
pub mod meta;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod responsive;
pub mod schema;
pub mod tokens;
pub mod validate;
pub mod visitor;

#[cfg(feature = "napi")]
mod native;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod compiler_tests;
#[cfg(test)]
mod editing_tests;

pub use backend::{Backend, Document, NewTemplate};
pub use cache::{CacheKey, CacheStats, CompilationCache};
pub use compiler::{compile, CompileOutput, CompiledComponentConfig, MISSING_COMPONENT_ID};
pub use config::{
    BuildOptions, CompileOptions, Config, ConfigTokenValue, ContextParams, CustomTypeDefinition,
    DeviceRange, Devices, Locale, Template,
};
pub use definition::{
    AutoInput, ChangeInput, ComponentDefinition, EditingInput, EditingOutput, StylesInput,
    StylesOutput,
};
pub use discovery::discover_templates;
pub use error::{CompileError, Result, UnknownTokenError};
pub use externals::{
    find_externals, find_externals_with_data, parse_request_id, ExternalData, ExternalDataStore,
    ExternalReference, ExternalWithSchemaProp, FetchOutputResources, FetchResourceResult,
    RequestedExternalData,
};
pub use meta::CompilationMetadata;
pub use normalize::normalize;
pub use orchestrator::{
    build_document, build_entry, compile_locales, BuildEntryResult, ExternalDataFetcher,
};
pub use registry::CompilationContext;
pub use responsive::ResponsiveValue;
pub use schema::{SchemaProp, SchemaPropKind};
pub use tokens::resolve_token;
pub use validate::{validate, CompilerWarning};

#[cfg(feature = "napi")]
pub use native::{compile_native, find_externals_native, validate_native};
