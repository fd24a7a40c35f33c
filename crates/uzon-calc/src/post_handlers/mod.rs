//! String rewriters applied to every block before it is committed to the sheet.
//!
//! Handlers run in ascending priority; handlers of equal priority run in name order. A
//! handler that fails is skipped for that block and the failure is logged.

mod paren_simplify;
mod subscriptify;
mod swap_alias;
mod swap_symbol;

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::context::Context;

pub use paren_simplify::ParenSimplify;
pub use subscriptify::Subscriptify;
pub use swap_alias::SwapAlias;
pub use swap_symbol::SwapSymbol;

/// A handler gave up on a block.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("post handler '{handler}' failed: {reason}")]
pub struct PostHandlerError {
    pub handler: &'static str,
    pub reason: String,
}

impl PostHandlerError {
    pub fn new(handler: &'static str, reason: impl Into<String>) -> Self {
        PostHandlerError {
            handler,
            reason: reason.into(),
        }
    }
}

pub trait PostHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Smaller runs first.
    fn priority(&self) -> i32 {
        100
    }

    fn handle(&self, data: &str, ctx: &Context) -> Result<String, PostHandlerError>;
}

pub type SharedHandler = Arc<dyn PostHandler>;

/// Orders handlers by priority, then by name. The sort is stable.
pub fn sort_handlers(handlers: &mut [SharedHandler]) {
    handlers.sort_by(|a, b| (a.priority(), a.name()).cmp(&(b.priority(), b.name())));
}

/// Runs `handlers` over `data` in order.
pub fn apply(handlers: &[SharedHandler], data: String, ctx: &Context) -> String {
    handlers
        .iter()
        .fold(data, |data, handler| match handler.handle(&data, ctx) {
            Ok(out) => out,
            Err(err) => {
                warn!(handler = handler.name(), "{err}");
                data
            }
        })
}

type HandlerFactory = fn() -> SharedHandler;

static FACTORIES: LazyLock<RwLock<Vec<HandlerFactory>>> = LazyLock::new(|| {
    RwLock::new(vec![
        || Arc::new(ParenSimplify),
        || Arc::new(SwapSymbol),
        || Arc::new(SwapAlias),
        || Arc::new(Subscriptify),
    ])
});

/// Adds a handler to the chain of every context created afterwards.
pub fn register_post_handler(factory: HandlerFactory) {
    FACTORIES.write().push(factory);
}

/// A fresh, sorted handler chain for a new context.
pub fn default_handlers() -> Vec<SharedHandler> {
    let mut handlers: Vec<SharedHandler> = FACTORIES.read().iter().map(|make| make()).collect();
    sort_handlers(&mut handlers);
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl PostHandler for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn handle(&self, _: &str, _: &Context) -> Result<String, PostHandlerError> {
            Err(PostHandlerError::new("Failing", "always"))
        }
    }

    #[test]
    fn default_order() {
        let names: Vec<_> = default_handlers().iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            ["ParenSimplify", "SwapAlias", "SwapSymbol", "Subscriptify"]
        );
    }

    #[test]
    fn failing_handler_is_skipped() {
        let ctx = Context::for_tests();
        let handlers: Vec<SharedHandler> = vec![Arc::new(Failing), Arc::new(Subscriptify)];
        let out = apply(&handlers, "<mi>a_b</mi>".to_string(), &ctx);
        assert_eq!(out, "<msub><mi>a</mi><mtext>b</mtext></msub>");
    }

    #[test]
    fn chain_is_idempotent() {
        let mut ctx = Context::for_tests();
        ctx.set_alias("v_car", Some("v_auto"));
        let handlers = default_handlers();
        let block = "<p><math><mi>alpha_v_car</mi><mo>=</mo><mn>(3)</mn></math> 'beta'</p>";
        let once = apply(&handlers, block.to_string(), &ctx);
        let twice = apply(&handlers, once.clone(), &ctx);
        assert_eq!(once, twice);
    }
}
