fn main() {
    termreg_lib::run()
}
