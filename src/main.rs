use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    peupajoh_chat::cli::main()
}
