use bytes::Bytes;

use crate::iterators::StorageIterator;

/// Route engine tracing into the test harness output. Repeated calls
/// are fine; only the first subscriber wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Monotone predicate matching every key with `prefix`.
pub fn prefix_pred(prefix: &'static [u8]) -> impl Fn(&[u8]) -> i32 {
    move |key: &[u8]| {
        if key.starts_with(prefix) {
            0
        } else if key < prefix {
            1
        } else {
            -1
        }
    }
}

/// Drain an iterator into `(key, value)` pairs.
pub fn collect_iter(mut iter: impl StorageIterator) -> Vec<(Bytes, Bytes)> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((
            Bytes::copy_from_slice(iter.key()),
            Bytes::copy_from_slice(iter.value()),
        ));
        iter.next().unwrap();
    }
    out
}

pub fn assert_iter_eq(iter: impl StorageIterator, expected: Vec<(Bytes, Bytes)>) {
    assert_eq!(collect_iter(iter), expected);
}
