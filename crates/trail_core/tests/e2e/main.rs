//! End-to-end scenarios driving the engine over real git repositories.

mod harness;

mod chunking;
mod lifecycle;
mod promotion;
mod rewrites;
mod validation;
