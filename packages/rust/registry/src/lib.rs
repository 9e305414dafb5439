//! Business-registry resolution with a durable cache in front.
//!
//! [`Resolver`] turns a [`Cnpj`](prospector_shared::Cnpj) into a
//! [`ResolvedEntity`](prospector_shared::ResolvedEntity) by trying, in order,
//! the resolution cache, the primary registry provider and the secondary
//! one. Provider failures never surface to callers: an identifier neither
//! provider can answer simply resolves to `None`.

pub mod providers;
mod resolver;

pub use providers::{BrasilApi, ReceitaWs, RegistryProvider};
pub use resolver::{EntityResolver, Resolution, ResolutionSource, Resolver};
