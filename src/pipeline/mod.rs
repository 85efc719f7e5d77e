pub mod validation; // Medical support letter authenticity validator
