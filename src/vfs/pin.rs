//! Version pinning in front of a package registry.
//!
//! The first request for an unversioned package resolves it to whatever the
//! registry calls current; every later request for that package name goes to
//! the same `name@version`, so one process never mixes two versions of a
//! package in its library tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use log::{debug, warn};

use crate::core::utils::to_tokens;
use crate::vfs::remote::{FetchError, FetchFuture, Fetched, Fetcher};

/// Concrete identity of a published package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    name: String,
    version: String,
}

impl PackageId {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A registry answer together with the package it was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub package: PackageId,
    pub body: Fetched,
}

/// Raw package registry.
pub trait Registry {
    /// `spec` is a package name, optionally followed by `@version`. `rest` is
    /// the path inside the package, empty or starting with `/`.
    fn resolve(
        &self,
        spec: &str,
        rest: &str,
        wants_directory: bool,
    ) -> LocalBoxFuture<'static, Result<Resolved, FetchError>>;
}

/// Package name to pinned version.
#[derive(Debug, Default)]
pub struct VersionPins {
    pins: RefCell<HashMap<String, String>>,
}

impl VersionPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.pins.borrow().get(name).cloned()
    }

    /// Records `version` unless `name` is pinned already. Returns the pin in effect.
    pub fn pin(&self, name: &str, version: &str) -> String {
        self.pins
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| version.to_string())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.pins.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.pins.borrow_mut().clear();
    }
}

/// A remote path split into package name, requested version and the rest.
#[derive(Debug, PartialEq, Eq)]
struct Request {
    name: String,
    version: Option<String>,
    rest: String,
}

/// `/@scope/pkg@1.0.0/lib/x.js` -> (`@scope/pkg`, `Some("1.0.0")`, `/lib/x.js`).
fn split_request(remote_path: &str) -> Option<Request> {
    let tokens = to_tokens(remote_path);
    let (head, rest) = match tokens.first() {
        Some(scope) if scope.starts_with('@') => (format!("{scope}/{}", tokens.get(1)?), &tokens[2..]),
        Some(first) => (first.to_string(), &tokens[1..]),
        None => return None,
    };
    // the version separator is the last `@` that is not the scope marker
    let (name, version) = match head.rfind('@').filter(|idx| *idx > 0) {
        Some(idx) => (head[..idx].to_string(), Some(head[idx + 1..].to_string())),
        None => (head, None),
    };
    let rest = if rest.is_empty() {
        String::new()
    } else {
        format!("/{}", rest.join("/"))
    };
    Some(Request {
        name,
        version,
        rest,
    })
}

/// [`Fetcher`] that pins package versions on first contact.
pub struct PinnedFetcher<R> {
    registry: Rc<R>,
    pins: Rc<VersionPins>,
}

impl<R: Registry> PinnedFetcher<R> {
    pub fn new(registry: R) -> Self {
        Self::with_pins(Rc::new(registry), Rc::new(VersionPins::new()))
    }

    /// Shares an existing pin table, e.g. one per process.
    pub fn with_pins(registry: Rc<R>, pins: Rc<VersionPins>) -> Self {
        Self { registry, pins }
    }

    pub fn pins(&self) -> &Rc<VersionPins> {
        &self.pins
    }
}

/// Checks that `resolved` is the package that was asked for.
fn verify(resolved: &Resolved, name: &str, version: Option<&str>, spec: &str) -> Result<(), FetchError> {
    let package = &resolved.package;
    let wrong_version = version.is_some_and(|wanted| wanted != package.version());
    if package.name() != name || wrong_version {
        warn!("registry answered {package} for {spec}");
        return Err(FetchError::Protocol {
            requested: spec.to_string(),
            received: package.to_string(),
        });
    }
    Ok(())
}

impl<R: Registry + 'static> Fetcher for PinnedFetcher<R> {
    fn fetch(&self, remote_path: &str, wants_directory: bool) -> FetchFuture {
        let Some(request) = split_request(remote_path) else {
            return future::ready(Err(FetchError::NotFound(remote_path.to_string()))).boxed_local();
        };
        let version = request
            .version
            .or_else(|| self.pins.get(&request.name));
        let spec = match &version {
            Some(version) => format!("{}@{}", request.name, version),
            None => request.name.clone(),
        };
        debug!("resolving {spec}{} from registry", request.rest);
        let pending = self.registry.resolve(&spec, &request.rest, wants_directory);
        let registry = Rc::clone(&self.registry);
        let pins = Rc::clone(&self.pins);
        let name = request.name;
        let rest = request.rest;
        async move {
            let resolved = pending.await?;
            verify(&resolved, &name, version.as_deref(), &spec)?;
            let pinned = pins.pin(&name, resolved.package.version());
            if pinned == resolved.package.version() {
                return Ok(resolved.body);
            }
            // another first contact pinned the package while this one was in flight
            let spec = format!("{name}@{pinned}");
            debug!("{} lost the pin to {spec}, resolving again", resolved.package);
            let resolved = registry.resolve(&spec, &rest, wants_directory).await?;
            verify(&resolved, &name, Some(&pinned), &spec)?;
            Ok(resolved.body)
        }
        .boxed_local()
    }
}
