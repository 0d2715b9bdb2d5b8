use rayon::prelude::*;
use std::sync::OnceLock;

const PAR_THRESHOLD_DEFAULT: usize = 65_536;
const PAR_MIN_WORK_PER_THREAD: usize = 2048;

fn parallel_threshold() -> usize {
    static THRESHOLD: OnceLock<usize> = OnceLock::new();
    *THRESHOLD.get_or_init(|| {
        std::env::var("SIM_PAR_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(PAR_THRESHOLD_DEFAULT)
    })
}

pub(crate) fn should_parallel(len: usize) -> bool {
    if len < parallel_threshold() {
        return false;
    }
    let threads = rayon::current_num_threads().max(1);
    len / threads >= PAR_MIN_WORK_PER_THREAD
}

pub(crate) fn for_each_indexed<T: Send>(data: &mut [T], f: impl Fn(usize, &mut T) + Sync) {
    if should_parallel(data.len()) {
        data.par_iter_mut()
            .enumerate()
            .for_each(|(i, value)| f(i, value));
    } else {
        for (i, value) in data.iter_mut().enumerate() {
            f(i, value);
        }
    }
}

pub(crate) fn collect_indexed<T: Send>(len: usize, f: impl Fn(usize) -> T + Sync + Send) -> Vec<T> {
    if should_parallel(len) {
        (0..len).into_par_iter().map(f).collect()
    } else {
        (0..len).map(f).collect()
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if should_parallel(a.len()) {
        a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
    } else {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

pub(crate) fn max_abs(values: &[f64]) -> f64 {
    if should_parallel(values.len()) {
        values
            .par_iter()
            .map(|value| value.abs())
            .reduce(|| 0.0_f64, f64::max)
    } else {
        values
            .iter()
            .map(|value| value.abs())
            .fold(0.0_f64, f64::max)
    }
}
