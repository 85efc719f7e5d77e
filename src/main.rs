fn main() {
    letterguard::run()
}
