fn main() -> anyhow::Result<()> {
    rockprov_installer::run()
}
