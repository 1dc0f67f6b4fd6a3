mod files;

mod detector;
mod preprocess;
