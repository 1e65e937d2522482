pub mod pre_exec;
