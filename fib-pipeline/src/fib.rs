use crate::model::Index;

/// Fibonacci value of `index` with both base cases equal to one.
///
/// `fib(0) == fib(1) == 1`, so the sequence is shifted one place relative to
/// the canonical `0, 1, 1, 2, ...`. Evaluation is the naive double recursion
/// and takes exponential time; callers bound the index instead of memoizing.
pub fn fib(index: Index) -> u64 {
    if index < 2 {
        return 1;
    }
    fib(index - 1) + fib(index - 2)
}
