//! Content-addressed kernel names.

use rayon::prelude::*;

use super::kernels::KernelSpec;

/// Hex digits of the BLAKE3 digest kept in a kernel name.
const NAME_DIGEST_LEN: usize = 12;

/// `<kind>_<digest>` for every kernel, in input order. Specs emitting the
/// same code get equal names.
pub fn kernel_names(specs: &[KernelSpec]) -> Vec<String> {
    specs.par_iter().map(kernel_name).collect()
}

pub fn kernel_name(spec: &KernelSpec) -> String {
    let digest = blake3::hash(spec.signature().as_bytes());
    format!("{}_{}", spec.kind.name(), &digest.to_hex().as_str()[..NAME_DIGEST_LEN])
}
