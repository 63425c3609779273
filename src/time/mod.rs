pub mod ratecounter;
