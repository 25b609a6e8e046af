mod directory;

pub use directory::DirectoryPolicySource;
