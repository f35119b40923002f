pub mod args;

pub use args::Arguments;

pub fn parse() -> Arguments {
    use clap::Parser;
    Arguments::parse()
}
