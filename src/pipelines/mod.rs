pub mod emu_abundance;
