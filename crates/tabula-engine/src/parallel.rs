use crate::settings::RecalcMode;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Crate-local pool used to recompute the fields of one plan level.
///
/// The global Rayon pool panics on first use when it cannot spawn threads, so the executor owns
/// its pool and falls back to sequential execution when none can be built.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static COMPUTE_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn desired_threads() -> usize {
    ["TABULA_COMPUTE_THREADS", "RAYON_NUM_THREADS"]
        .iter()
        .find_map(|var| {
            std::env::var(var)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|&n| n > 0)
        })
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_pool() -> Option<ThreadPool> {
    let requested = desired_threads().max(1);
    let try_build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|idx| format!("tabula-compute-{idx}"))
            .build()
    };

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(_) if requested > 1 => try_build(1).ok(),
        Err(err) => {
            log::warn!("compute thread pool unavailable, running sequentially: {err}");
            None
        }
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn compute_pool() -> Option<&'static ThreadPool> {
    COMPUTE_POOL.get_or_init(build_pool).as_ref()
}

/// Maps `f` over one level's items, in parallel when `mode` and the build allow it.
///
/// Results keep the order of `items`.
pub(crate) fn map_level<T, R, F>(mode: RecalcMode, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    {
        if mode == RecalcMode::MultiThreaded && items.len() > 1 {
            if let Some(pool) = compute_pool() {
                use rayon::prelude::*;
                return pool.install(|| items.par_iter().map(&f).collect());
            }
        }
    }

    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    let _ = mode;

    items.iter().map(f).collect()
}
