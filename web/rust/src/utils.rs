// This code is derived from
// https://github.com/rustwasm/wasm-pack-template/blob/a3acfd295f0a10f2ddb6eebf6db10e057369df6a/src/utils.rs

pub(crate) fn set_panic_hook() {
    // With the `console_error_panic_hook` feature, panics are reported
    // through `console.error` with a readable message.
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
