//! Per-call credentials.
//!
//! A credentials provider is consulted once per call, before the transport is
//! opened, and returns extra metadata to send with the call:
//! - Adding authentication tokens
//! - Tagging calls with the method they target
//!
//! # Example
//!
//! ```ignore
//! use asynccall::{Channel, FnCredentials, MetadataCredentials};
//!
//! let auth = MetadataCredentials::new("authorization", "Bearer token123");
//! let tagged = FnCredentials::new(|ctx| {
//!     let mut metadata = asynccall::Metadata::new();
//!     metadata.insert("x-method", ctx.method).map_err(|e| {
//!         asynccall::Status::unauthenticated(e.to_string())
//!     })?;
//!     Ok(metadata)
//! });
//!
//! let channel = Channel::builder(transport)
//!     .credentials(auth)
//!     .credentials(tagged)
//!     .build()?;
//! ```

use std::sync::Arc;

use asynccall_core::Status;

use crate::metadata::{Metadata, MetadataError};

/// What a credentials provider is told about the call.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    /// The method being called (e.g., "/grpc.testing.TestService/UnaryCall").
    pub method: &'a str,
}

/// Source of additional metadata for a call.
///
/// Returning an error terminates the call with that status; the transport is
/// never opened.
///
/// # Generic Composition
///
/// Providers compose with [`Chain`]; the unit type `()` contributes nothing.
pub trait CallCredentials: Send + Sync + 'static {
    fn metadata(&self, context: &AuthContext<'_>) -> Result<Metadata, Status>;
}

impl CallCredentials for () {
    #[inline]
    fn metadata(&self, _context: &AuthContext<'_>) -> Result<Metadata, Status> {
        Ok(Metadata::new())
    }
}

impl<T: CallCredentials + ?Sized> CallCredentials for Arc<T> {
    fn metadata(&self, context: &AuthContext<'_>) -> Result<Metadata, Status> {
        (**self).metadata(context)
    }
}

/// Two providers applied in order; `B`'s entries are appended after `A`'s.
#[derive(Clone, Debug)]
pub struct Chain<A, B>(pub A, pub B);

impl<A, B> CallCredentials for Chain<A, B>
where
    A: CallCredentials,
    B: CallCredentials,
{
    fn metadata(&self, context: &AuthContext<'_>) -> Result<Metadata, Status> {
        let mut metadata = self.0.metadata(context)?;
        metadata.merge(self.1.metadata(context)?);
        Ok(metadata)
    }
}

/// Static metadata attached to every call.
#[derive(Clone, Debug, Default)]
pub struct MetadataCredentials {
    metadata: Metadata,
}

impl MetadataCredentials {
    /// Create a provider for a single key/value pair.
    ///
    /// # Panics
    ///
    /// Panics if the key or value is invalid metadata.
    pub fn new(key: &str, value: &str) -> Self {
        match Self::try_new(key, value) {
            Ok(credentials) => credentials,
            Err(err) => panic!("{err}"),
        }
    }

    /// Try to create a provider, returning an error if the entry is invalid.
    pub fn try_new(key: &str, value: &str) -> Result<Self, MetadataError> {
        let mut metadata = Metadata::new();
        metadata.insert(key, value)?;
        Ok(Self { metadata })
    }

    /// Create a provider from pre-built metadata.
    pub fn from_metadata(metadata: Metadata) -> Self {
        Self { metadata }
    }
}

impl CallCredentials for MetadataCredentials {
    fn metadata(&self, _context: &AuthContext<'_>) -> Result<Metadata, Status> {
        Ok(self.metadata.clone())
    }
}

/// A provider backed by a closure.
pub struct FnCredentials<F> {
    f: F,
}

impl<F> FnCredentials<F>
where
    F: Fn(&AuthContext<'_>) -> Result<Metadata, Status> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> CallCredentials for FnCredentials<F>
where
    F: Fn(&AuthContext<'_>) -> Result<Metadata, Status> + Send + Sync + 'static,
{
    fn metadata(&self, context: &AuthContext<'_>) -> Result<Metadata, Status> {
        (self.f)(context)
    }
}

impl<F> std::fmt::Debug for FnCredentials<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCredentials").finish_non_exhaustive()
    }
}

/// Type-erased provider, as stored by channels and call options.
pub(crate) type SharedCredentials = Arc<dyn CallCredentials>;

/// Resolve the metadata of an ordered list of providers.
pub(crate) fn collect_metadata<'a>(
    providers: impl IntoIterator<Item = &'a SharedCredentials>,
    method: &str,
) -> Result<Metadata, Status> {
    let context = AuthContext { method };
    let mut metadata = Metadata::new();
    for provider in providers {
        metadata.merge(provider.metadata(&context)?);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use asynccall_core::Code;

    use super::*;

    #[test]
    fn test_unit_adds_nothing() {
        let context = AuthContext { method: "/svc/Method" };
        assert!(().metadata(&context).unwrap().is_empty());
    }

    #[test]
    fn test_chain_applies_in_order() {
        let chain = Chain(
            MetadataCredentials::new("x-token", "first"),
            MetadataCredentials::new("x-token", "second"),
        );
        let metadata = chain.metadata(&AuthContext { method: "/svc/Method" }).unwrap();
        assert_eq!(
            metadata.get_all("x-token").collect::<Vec<_>>(),
            vec!["first", "second"]
        );
    }

    #[test]
    fn test_fn_credentials_see_method() {
        let provider = FnCredentials::new(|ctx: &AuthContext<'_>| {
            let mut metadata = Metadata::new();
            metadata
                .insert("x-method", ctx.method)
                .map_err(|e| Status::internal(e.to_string()))?;
            Ok(metadata)
        });
        let metadata = provider
            .metadata(&AuthContext { method: "/svc/Method" })
            .unwrap();
        assert_eq!(metadata.get("x-method"), Some("/svc/Method"));
    }

    #[test]
    fn test_collect_stops_at_first_failure() {
        let providers: Vec<SharedCredentials> = vec![
            Arc::new(MetadataCredentials::new("a", "1")),
            Arc::new(FnCredentials::new(|_: &AuthContext<'_>| {
                Err(Status::unauthenticated("no token"))
            })),
        ];
        let err = collect_metadata(&providers, "/svc/Method").unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
        assert_eq!(err.details(), "no token");
    }

    #[test]
    fn test_try_new_rejects_invalid_key() {
        assert!(MetadataCredentials::try_new("bad key", "v").is_err());
    }
}
