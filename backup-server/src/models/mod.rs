pub mod machine_program;
