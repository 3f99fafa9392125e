//! Links `librfxcodec`, the RemoteFX encoder the `codecs::rfx` FFI
//! contract binds against (§4.8).

fn main() {
    if let Err(e) = pkg_config::Config::new().atleast_version("1.0").probe("rfxcodec") {
        println!(
            "cargo:warning=librfxcodec not found via pkg-config ({e}); \
             the RemoteFX codec adapter will fail to link. Install xrdp's \
             librfxcodec development package or its pkg-config file."
        );
    }

    println!("cargo:rerun-if-changed=build.rs");
}
