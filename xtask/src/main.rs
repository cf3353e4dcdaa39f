/// Bundles the plugin via nih_plug_xtask:
///
///   cargo xtask bundle rise-and-fall --release
///
/// The bundles end up in `target/bundled/`.
fn main() -> nih_plug_xtask::Result<()> {
    nih_plug_xtask::main()
}
