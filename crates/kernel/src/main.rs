#![cfg_attr(target_os = "none", no_std, no_main)]

#[cfg(target_os = "none")]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    wey_kernel::handle_panic(info)
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("wey runs on bare metal; build it for the i686-wey target");
    std::process::exit(1);
}
