mod utils;

mod forward;
mod linker;
mod load;
mod regions;
