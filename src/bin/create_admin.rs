use std::{
    error::Error,
    io::{self},
    path::Path,
    process::exit,
};

use bcrypt::DEFAULT_COST;
use clap::Parser;
use rusqlite::Connection;

use fundbook::{
    PasswordHash, Role, initialize_db,
    user::{NewUser, get_user_by_username, insert_user, update_password_hash},
};

/// A utility for creating an admin account, or resetting the password of
/// an existing account.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The login name of the account to create or reset.
    #[arg(long, default_value = "admin")]
    username: String,

    /// The display name for a newly created account.
    #[arg(long, default_value = "Admin")]
    name: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let db_path = Path::new(&args.db_path);
    validate_db_path(db_path);

    let connection = Connection::open(db_path)
        .unwrap_or_else(|_| panic!("Could not open the database at {db_path:?}"));
    initialize_db(&connection)?;

    let password_hash = match get_new_password_hash() {
        Some(password_hash) => password_hash,
        None => return Ok(()),
    };

    match get_user_by_username(&args.username, &connection) {
        Ok(user) => {
            update_password_hash(user.id, &password_hash, &connection)?;
            println!("Password updated for \"{}\".", user.username);
        }
        Err(fundbook::Error::NotFound) => {
            insert_user(
                &NewUser {
                    username: &args.username,
                    password_hash: &password_hash,
                    name: &args.name,
                    role: Role::Admin,
                    active: true,
                    must_change_password: false,
                },
                &connection,
            )?;
            println!("Created admin account \"{}\".", args.username);
        }
        Err(error) => return Err(error.into()),
    }

    Ok(())
}

fn validate_db_path(db_path: &Path) {
    match db_path.extension() {
        None => {
            print_error("Database path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            print_error("Database path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }
}

fn get_new_password_hash() -> Option<PasswordHash> {
    loop {
        println!();

        let first_password = match rpassword::prompt_password("Enter a new password: ") {
            Ok(string) => string,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                return None;
            }
            Err(error) => {
                print_error(format!("Could not read password from stdin: {error}"));
                continue;
            }
        };

        if first_password.len() < 4 {
            print_error("Password must be at least 4 characters long.");
            continue;
        }

        let second_password = match rpassword::prompt_password("Confirm the new password: ") {
            Ok(string) => string,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                return None;
            }
            Err(error) => {
                print_error(format!("Could not read password from stdin: {error}"));
                continue;
            }
        };

        if first_password != second_password {
            print_error("Passwords do not match.");
            continue;
        }

        match PasswordHash::from_raw_password(&first_password, DEFAULT_COST) {
            Ok(password_hash) => return Some(password_hash),
            Err(error) => {
                print_error(format!("Could not hash password: {error}"));
                continue;
            }
        }
    }
}

fn print_error(message: impl AsRef<str>) {
    eprintln!("Error: {}", message.as_ref());
}
