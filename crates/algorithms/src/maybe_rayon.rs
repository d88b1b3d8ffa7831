/// Compatibility layer for rayon/sequential execution.
///
/// With the `parallel` feature on, re-exports rayon's parallel iterators.
/// With it off, provides a sequential stand-in with the same API surface, so
/// algorithm code is written once against `into_par_iter()`.
#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    ///
    /// `into_par_iter()` resolves to `into_iter()`, so the rest of the chain
    /// (`.map()`, `.flat_map()`, `.collect()`, ...) falls through to the
    /// standard `Iterator` methods.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
