//! Priority resolver.
//!
//! A valid priority hint carried by the request wins outright and the
//! handler is never consulted.  Otherwise the handler's priority rule is
//! asked under the runtime lock; a failing rule or an out-of-range band
//! falls back to [`Priority::Normal`].

use log::{debug, error};

use crate::app::ports::HandlerAdapter;
use crate::dispatcher::Priority;
use crate::runtime;

pub fn resolve(adapter: &dyn HandlerAdapter, method: &str, hint: Option<Priority>) -> Priority {
    if let Some(p) = hint {
        debug!("bridge: priority {:?} for {:?} from request header", p, method);
        return p;
    }

    let guard = runtime::acquire();
    match adapter.priority_of(&guard, method) {
        Ok(raw) => Priority::from_raw(raw).unwrap_or_else(|| {
            error!("bridge: priority_of({:?}) returned out-of-range band {}", method, raw);
            Priority::default()
        }),
        Err(e) => {
            error!("bridge: priority_of({:?}) failed: {}", method, e);
            Priority::default()
        }
    }
}
