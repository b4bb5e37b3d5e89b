//! Built-in problems for the POMDP solvers.
//!
//! These serve as:
//!
//! 1. **Validation**: problems with known optimal values check that the
//!    solvers converge to the right answer.
//!
//! 2. **Benchmarks**: standard models for the benchmark binary and criterion
//!    benches.
//!
//! ## Available Problems
//!
//! - [`tiger`]: The classic two-door tiger problem (optimal value ≈ 19.37)
//! - [`coin`]: A coin that is revealed after every step (closed-form value)

pub mod coin;
pub mod tiger;
