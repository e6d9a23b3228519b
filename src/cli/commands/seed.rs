use clap::{Arg, Command};

pub const COMMAND: &str = "seed-admin";
pub const ARG_USERNAME: &str = "username";
pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_FIRST_NAME: &str = "first-name";
pub const ARG_LAST_NAME: &str = "last-name";

#[must_use]
pub fn command() -> Command {
    Command::new(COMMAND)
        .about("Create the initial admin account unless it already exists")
        .arg(
            Arg::new(ARG_USERNAME)
                .long(ARG_USERNAME)
                .help("Admin username (at least 3 characters)")
                .env("SAFEHAVEN_ADMIN_USERNAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_EMAIL)
                .long(ARG_EMAIL)
                .help("Admin email address")
                .env("SAFEHAVEN_ADMIN_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long(ARG_PASSWORD)
                .help("Admin password (at least 8 characters)")
                .env("SAFEHAVEN_ADMIN_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FIRST_NAME)
                .long(ARG_FIRST_NAME)
                .help("First name (default: Super)")
                .env("SAFEHAVEN_ADMIN_FIRST_NAME"),
        )
        .arg(
            Arg::new(ARG_LAST_NAME)
                .long(ARG_LAST_NAME)
                .help("Last name (default: Admin)")
                .env("SAFEHAVEN_ADMIN_LAST_NAME"),
        )
}
