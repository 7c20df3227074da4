pub mod phash;
