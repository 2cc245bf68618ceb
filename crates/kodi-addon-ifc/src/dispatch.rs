//! `(group, func)` to handler table, built once and shared read-only.

use crate::api::{self, ApiFunction};
use crate::error::Result;
use crate::protocol::{FuncGroup, Frame};
use std::collections::HashMap;

type Handler<C> = Box<dyn Fn(&C, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

pub struct HandlerTable<C> {
    handlers: HashMap<(FuncGroup, u32), Handler<C>>,
}

impl<C: 'static> Default for HandlerTable<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: 'static> HandlerTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `F`, replacing any previous one.
    pub fn register<F, H>(&mut self, handler: H) -> &mut Self
    where
        F: ApiFunction,
        H: Fn(&C, F::Input) -> Result<F::Output> + Send + Sync + 'static,
    {
        let erased: Handler<C> = Box::new(move |ctx, payload| {
            let input: F::Input = api::decode(payload)?;
            let output = handler(ctx, input)?;
            api::encode(&output)
        });
        self.handlers.insert((F::GROUP, F::ID), erased);
        self
    }

    pub fn dispatch(&self, ctx: &C, frame: &Frame) -> Result<Vec<u8>> {
        match self.handlers.get(&(frame.group, frame.func)) {
            Some(handler) => handler(ctx, &frame.payload),
            None => Err(api::unknown_function(frame)),
        }
    }

    pub fn contains(&self, group: FuncGroup, func: u32) -> bool {
        self.handlers.contains_key(&(group, func))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
