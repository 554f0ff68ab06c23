// src/lib.rs

pub mod config;
pub mod error;

pub mod entities {
    pub mod prelude;
    pub mod production_data;
}

pub mod models {
    pub mod production;
}

pub mod services {
    pub mod clock;
    pub mod replay_state;
    pub mod retry;
    pub mod sink_writer;
    pub mod source_reader;
    pub mod time_mapper;
}

pub mod jobs {
    pub mod production_stream;
    pub mod shutdown;
}
