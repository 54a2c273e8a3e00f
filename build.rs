fn main() {
    // ESP-IDF link arguments and sysenv are only needed for on-target builds.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
