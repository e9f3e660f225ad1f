use assert_cmd::Command;

pub fn gendash_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("gendash").expect("gendash test binary should build")
    }
}
