fn main() {
    println!("cargo:rustc-link-lib=crypt");
    if std::env::var_os("CARGO_FEATURE_PAM").is_some() {
        println!("cargo:rustc-link-lib=pam");
    }
}
