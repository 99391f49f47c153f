//! Command-name routing table.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::connection::Connection;
use crate::scope::Scope;
use crate::wire::{Body, Response};

use super::errors::{HandlerError, ServiceError};

/// Handler producing the single response of a command.
pub type CommandHandler =
    Arc<dyn Fn(&Scope, &Connection, &Body) -> Result<Response, HandlerError> + Send + Sync>;

/// Callback owning an upgraded connection after its response was sent.
pub type DuplexHandler = Arc<dyn Fn(&Scope, &mut Connection) + Send + Sync>;

/// What a command name resolves to.
#[derive(Clone)]
pub(crate) enum Route {
    /// Respond once, then close.
    Simple(CommandHandler),
    /// Respond once, then hand the raw connection to the duplex callback.
    Stream(CommandHandler, DuplexHandler),
}

impl Route {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Stream(..) => "stream",
        }
    }
}

/// Immutable table of routes keyed by command name.
#[derive(Clone, Default)]
pub(crate) struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    /// Builds a table, rejecting blank and repeated names.
    pub(crate) fn build(
        definitions: impl IntoIterator<Item = (String, Route)>,
    ) -> Result<Self, ServiceError> {
        let mut routes = HashMap::new();
        for (name, route) in definitions {
            if name.trim().is_empty() {
                return Err(ServiceError::EmptyCommandName);
            }
            match routes.entry(name) {
                Entry::Occupied(entry) => {
                    return Err(ServiceError::DuplicateCommand {
                        command: entry.key().clone(),
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(route);
                }
            }
        }
        Ok(Self { routes })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub(crate) fn commands(&self) -> Vec<&str> {
        let mut names = self.routes.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple() -> Route {
        Route::Simple(Arc::new(|_, _, _| Ok(Response::new())))
    }

    #[test]
    fn resolves_registered_commands() {
        let router = Router::build([
            ("hi".to_string(), simple()),
            (
                "echo".to_string(),
                Route::Stream(Arc::new(|_, _, _| Ok(Response::new())), Arc::new(|_, _| {})),
            ),
        ])
        .expect("router");

        assert_eq!(router.lookup("hi").map(Route::kind), Some("simple"));
        assert_eq!(router.lookup("echo").map(Route::kind), Some("stream"));
        assert!(router.lookup("notExist").is_none());
        assert_eq!(router.commands(), ["echo", "hi"]);
    }

    #[test]
    fn rejects_duplicates() {
        let result = Router::build([("hi".to_string(), simple()), ("hi".to_string(), simple())]);
        assert!(matches!(
            result,
            Err(ServiceError::DuplicateCommand { command }) if command == "hi"
        ));
    }

    #[test]
    fn rejects_blank_names() {
        let result = Router::build([(" ".to_string(), simple())]);
        assert!(matches!(result, Err(ServiceError::EmptyCommandName)));
    }
}
